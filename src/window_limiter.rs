use std::{
    future::Future,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use tokio::sync::oneshot;

use crate::{
    Admission, AdmissionDecision, AdmissionLimit, WindowDuration, WindowGateError,
    reset_timer::{ResetTimer, ResetTimerOptions},
    runtime,
    window_state::WindowState,
};

/// Configuration for [`WindowLimiter`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowLimiterOptions {
    /// Length of each admission window.
    pub window_duration: WindowDuration,
    /// Maximum admissions per window.
    pub limit: AdmissionLimit,
}

/// Fixed-window admission gate for outbound operations.
///
/// Grants at most `limit` admissions per `window_duration`. Callers await
/// [`acquire`](Self::acquire) before each guarded operation (an HTTP call, say) and then
/// perform it themselves; the limiter holds no lock while they do.
///
/// # Algorithm
///
/// 1. **Construction** opens window `0` with a zero count and starts a background timer
/// 2. **Admission:** atomically increment the count only if it is below `limit`
/// 3. **Exhausted:** suspend the caller until the next reset (no polling)
/// 4. **Reset:** every `window_duration` the timer stores a fresh `(window, 0)` and wakes
///    all suspended callers, who race for the new slots
///
/// # Semantics
///
/// **Window counter, not a pool:**
/// - Admissions are never returned; only the timer frees capacity
/// - The bound is on the *rate of admission*, not on concurrently running operations
/// - A guarded operation that fails or runs long has no effect on later windows
///
/// **No fairness:**
/// - Any suspended caller may win a slot after a reset; FIFO order is not guaranteed
///
/// **Backpressure, not fail-fast:**
/// - An exhausted window blocks [`acquire`](Self::acquire) for as long as it takes;
///   use [`try_acquire`](Self::try_acquire) or [`acquire_timeout`](Self::acquire_timeout)
///   to bound the wait
///
/// **Shutdown:**
/// - [`shutdown`](Self::shutdown) (or dropping the limiter) stops the timer
/// - Every suspended and later acquire fails with [`WindowGateError::Closed`]
///
/// # Runtime
///
/// With the default `runtime-tokio` feature the limiter must be built inside a Tokio
/// runtime; outside one, construction returns [`WindowGateError::RuntimeUnavailable`].
/// The runtime also needs its time driver. Without it, or once the runtime is dropped,
/// the reset timer dies and the limiter closes itself: blocked and later acquires fail
/// with [`WindowGateError::Closed`] rather than waiting for a reset that never comes.
///
/// # Examples
///
/// ```no_run
/// use std::{sync::Arc, time::Duration};
/// use windowgate::WindowLimiter;
///
/// # async fn run() -> Result<(), windowgate::WindowGateError> {
/// let limiter = Arc::new(WindowLimiter::with_quota(Duration::from_secs(60), 5)?);
///
/// for _ in 0..20 {
///     let limiter = limiter.clone();
///     tokio::spawn(async move {
///         if limiter.acquire().await.is_ok() {
///             // perform the outbound call here
///         }
///     });
/// }
/// # Ok(())
/// # }
/// ```
pub struct WindowLimiter {
    options: WindowLimiterOptions,
    state: Arc<WindowState>,
    stop_timer: Mutex<Option<oneshot::Sender<()>>>,
}

impl WindowLimiter {
    /// Create a limiter and start its reset timer.
    pub fn new(options: WindowLimiterOptions) -> Result<Self, WindowGateError> {
        let origin = Instant::now();
        let state = Arc::new(WindowState::new(*options.limit, origin));

        let stop_timer = ResetTimer::run(ResetTimerOptions {
            state: state.clone(),
            window_duration: *options.window_duration,
            first_reset_at: origin + *options.window_duration,
        })?;

        tracing::debug!(
            limit = *options.limit,
            window_duration_ms = options.window_duration.as_millis_u64(),
            "window.limiter.started"
        );

        Ok(Self {
            options,
            state,
            stop_timer: Mutex::new(Some(stop_timer)),
        })
    } // end constructor

    /// Validate raw values and create a limiter.
    ///
    /// Fails with [`WindowGateError::InvalidConfiguration`] when `limit <= 0` or
    /// `window_duration` is zero; no timer is started in that case.
    pub fn with_quota(window_duration: Duration, limit: i64) -> Result<Self, WindowGateError> {
        Self::new(WindowLimiterOptions {
            window_duration: WindowDuration::try_from(window_duration)?,
            limit: AdmissionLimit::try_from(limit)?,
        })
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> &WindowState {
        &self.state
    }

    /// Maximum admissions per window.
    pub fn limit(&self) -> AdmissionLimit {
        self.options.limit
    }

    /// Length of each window.
    pub fn window_duration(&self) -> WindowDuration {
        self.options.window_duration
    }

    /// Slots left in the current window (a snapshot; may be stale by the time it is read).
    pub fn available(&self) -> u32 {
        let (_, count) = self.state.snapshot();
        self.options.limit.saturating_sub(count)
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    /// Wait until one guarded operation may proceed.
    ///
    /// Returns immediately while the current window has slots left. Otherwise the caller
    /// is suspended until a reset frees capacity, and re-checks atomically on wake-up.
    ///
    /// Dropping the future cancels the wait without consuming a slot.
    ///
    /// # Errors
    ///
    /// - [`WindowGateError::Closed`] if the limiter is, or becomes, shut down
    pub async fn acquire(&self) -> Result<Admission, WindowGateError> {
        let admission = self.state.admit().await?;

        tracing::trace!(
            window_index = admission.window_index(),
            slot = admission.slot(),
            "window.admitted"
        );

        Ok(admission)
    } // end method acquire

    /// Like [`acquire`](Self::acquire), but gives up once `cancel` completes.
    ///
    /// If admission is possible when first polled, it wins over an already-complete
    /// `cancel`.
    ///
    /// # Errors
    ///
    /// - [`WindowGateError::Cancelled`] if `cancel` completes first; no slot is consumed
    /// - [`WindowGateError::Closed`] if the limiter is, or becomes, shut down
    pub async fn acquire_until<C>(&self, cancel: C) -> Result<Admission, WindowGateError>
    where
        C: Future,
    {
        let acquire_fut = self.acquire();
        futures::pin_mut!(acquire_fut);
        futures::pin_mut!(cancel);

        match futures::future::select(acquire_fut, cancel).await {
            futures::future::Either::Left((result, _cancel)) => result,
            futures::future::Either::Right((_cancelled, _acquire_fut)) => {
                tracing::trace!("window.acquire.cancelled");
                Err(WindowGateError::Cancelled)
            }
        }
    } // end method acquire_until

    /// Like [`acquire`](Self::acquire), but gives up after `timeout`.
    ///
    /// # Errors
    ///
    /// - [`WindowGateError::Cancelled`] if the deadline passes first
    /// - [`WindowGateError::Closed`] if the limiter is, or becomes, shut down
    pub async fn acquire_timeout(&self, timeout: Duration) -> Result<Admission, WindowGateError> {
        self.acquire_until(runtime::sleep(timeout)).await
    }

    /// Admit without waiting.
    ///
    /// # Errors
    ///
    /// - [`WindowGateError::Closed`] if the limiter is shut down
    pub fn try_acquire(&self) -> Result<AdmissionDecision, WindowGateError> {
        match self.state.try_admit()? {
            Some(admission) => Ok(AdmissionDecision::Allowed(admission)),
            None => {
                let window_duration_ms = self.options.window_duration.as_millis_u64();
                let retry_after_ms = self.state.retry_after_ms(window_duration_ms);

                tracing::trace!(retry_after_ms, "window.rejected");

                Ok(AdmissionDecision::Rejected {
                    window_duration_ms,
                    retry_after_ms,
                })
            }
        }
    } // end method try_acquire

    /// Acquire, then run `operation` and hand back its output untouched.
    ///
    /// The operation runs outside the limiter; its own errors are neither inspected nor
    /// retried.
    ///
    /// # Errors
    ///
    /// Only the errors of [`acquire`](Self::acquire); the operation is not run then.
    pub async fn guard<F, Fut>(&self, operation: F) -> Result<Fut::Output, WindowGateError>
    where
        F: FnOnce(Admission) -> Fut,
        Fut: Future,
    {
        let admission = self.acquire().await?;

        Ok(operation(admission).await)
    } // end method guard

    /// Stop the reset timer and refuse further admissions.
    ///
    /// Suspended callers wake with [`WindowGateError::Closed`]. Calling this more than once
    /// is a no-op.
    pub fn shutdown(&self) {
        if !self.state.close() {
            return;
        }

        let stop_timer = self
            .stop_timer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        if let Some(stop_timer) = stop_timer {
            // The timer may already be gone with its runtime; nothing left to stop then.
            let _ = stop_timer.send(());
        }

        let (window_index, count) = self.state.snapshot();
        tracing::info!(window_index, admitted = count, "window.limiter.shutdown");
    } // end method shutdown
} // end of impl

impl Drop for WindowLimiter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WindowLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (window_index, count) = self.state.snapshot();

        f.debug_struct("WindowLimiter")
            .field("options", &self.options)
            .field("window_index", &window_index)
            .field("admitted", &count)
            .field("closed", &self.state.is_closed())
            .finish()
    }
}
