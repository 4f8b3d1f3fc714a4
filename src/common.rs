use std::{ops::Deref, time::Duration};

use crate::WindowGateError;

/// Length of one admission window.
///
/// A new window begins the instant the previous one ends; windows have no identity
/// beyond their sequence number (see [`Admission::window_index`]).
///
/// # Validation
///
/// Must be greater than zero.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use windowgate::WindowDuration;
///
/// let w = WindowDuration::try_from(Duration::from_secs(60)).unwrap();
/// assert_eq!(*w, Duration::from_secs(60));
///
/// // Milliseconds are accepted too.
/// let w = WindowDuration::try_from(250u64).unwrap();
/// assert_eq!(w.as_millis_u64(), 250);
///
/// assert!(WindowDuration::try_from(Duration::ZERO).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WindowDuration(Duration);

impl WindowDuration {
    /// Window length in whole milliseconds, saturating at `u64::MAX`.
    pub fn as_millis_u64(&self) -> u64 {
        u64::try_from(self.0.as_millis()).unwrap_or(u64::MAX)
    }
}

impl Deref for WindowDuration {
    type Target = Duration;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<Duration> for WindowDuration {
    type Error = WindowGateError;

    fn try_from(value: Duration) -> Result<Self, Self::Error> {
        if value.is_zero() {
            Err(WindowGateError::InvalidConfiguration(
                "Window duration must be greater than 0".to_string(),
            ))
        } else {
            Ok(Self(value))
        }
    }
}

impl TryFrom<u64> for WindowDuration {
    type Error = WindowGateError;

    /// Interprets `value` as milliseconds.
    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::try_from(Duration::from_millis(value))
    }
}

/// Maximum number of admissions granted per window.
///
/// Immutable once a limiter is built.
///
/// # Validation
///
/// - Must be greater than zero
/// - Must fit in 32 bits (the admitted count shares an atomic word with the window index)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AdmissionLimit(u32);

impl Deref for AdmissionLimit {
    type Target = u32;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<u32> for AdmissionLimit {
    type Error = WindowGateError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        if value == 0 {
            Err(WindowGateError::InvalidConfiguration(
                "Limit must be greater than 0".to_string(),
            ))
        } else {
            Ok(Self(value))
        }
    }
}

impl TryFrom<u64> for AdmissionLimit {
    type Error = WindowGateError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        let value = u32::try_from(value).map_err(|_| {
            WindowGateError::InvalidConfiguration(format!(
                "Limit must not exceed {}",
                u32::MAX
            ))
        })?;

        Self::try_from(value)
    }
}

impl TryFrom<i64> for AdmissionLimit {
    type Error = WindowGateError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        if value <= 0 {
            return Err(WindowGateError::InvalidConfiguration(
                "Limit must be greater than 0".to_string(),
            ));
        }

        Self::try_from(value as u64)
    }
}

/// Proof that one guarded operation may proceed.
///
/// There is nothing to release: capacity comes back only when the window resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub(crate) window_index: u32,
    pub(crate) slot: u32,
}

impl Admission {
    /// Sequence number of the window that granted this admission.
    ///
    /// The window opened at construction is `0`; each reset increments it (wrapping).
    pub fn window_index(&self) -> u32 {
        self.window_index
    }

    /// 1-based position of this admission within its window, never above the limit.
    pub fn slot(&self) -> u32 {
        self.slot
    }
}

/// Outcome of a non-blocking admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    /// Admitted; the caller may perform one guarded operation.
    Allowed(Admission),
    /// The current window's quota is spent.
    ///
    /// Includes best-effort hints for callers that want to back off on their own.
    Rejected {
        /// Window length used for the decision.
        window_duration_ms: u64,
        /// Milliseconds until the next scheduled reset.
        retry_after_ms: u64,
    },
}
