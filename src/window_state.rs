use std::{
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    time::Instant,
};

use tokio::sync::Notify;

use crate::{Admission, WindowGateError};

const COUNT_BITS: u32 = 32;
const COUNT_MASK: u64 = u32::MAX as u64;

#[inline]
fn pack(window_index: u32, count: u32) -> u64 {
    ((window_index as u64) << COUNT_BITS) | count as u64
}

#[inline]
fn unpack(word: u64) -> (u32, u32) {
    ((word >> COUNT_BITS) as u32, (word & COUNT_MASK) as u32)
}

/// Shared admission state for one limiter.
///
/// The window index and the admitted count live in a single atomic word so that an
/// admission and a reset can never interleave half-way: admission is a CAS that only
/// succeeds against the exact word it checked, and a reset is one plain store.
pub(crate) struct WindowState {
    limit: u32,
    word: AtomicU64,
    closed: AtomicBool,
    origin: Instant,
    window_started_ms: AtomicU64,
    notify: Notify,
}

impl WindowState {
    pub(crate) fn new(limit: u32, origin: Instant) -> Self {
        Self {
            limit,
            word: AtomicU64::new(pack(0, 0)),
            closed: AtomicBool::new(false),
            origin,
            window_started_ms: AtomicU64::new(0),
            notify: Notify::new(),
        }
    } // end constructor

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Current `(window_index, admitted_count)`.
    pub(crate) fn snapshot(&self) -> (u32, u32) {
        unpack(self.word.load(Ordering::Acquire))
    }

    /// Take one slot in the current window if any is left.
    ///
    /// Returns `Ok(None)` when the window is exhausted.
    pub(crate) fn try_admit(&self) -> Result<Option<Admission>, WindowGateError> {
        if self.is_closed() {
            return Err(WindowGateError::Closed);
        }

        let mut current = self.word.load(Ordering::Acquire);

        loop {
            let (window_index, count) = unpack(current);

            if count >= self.limit {
                return Ok(None);
            }

            match self.word.compare_exchange_weak(
                current,
                pack(window_index, count + 1),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Ok(Some(Admission {
                        window_index,
                        slot: count + 1,
                    }));
                }
                Err(actual) => current = actual,
            }
        }
    } // end method try_admit

    /// Wait until a slot is taken or the state is closed.
    ///
    /// Dropping the returned future at any await point leaves the count untouched.
    pub(crate) async fn admit(&self) -> Result<Admission, WindowGateError> {
        loop {
            let notified = self.notify.notified();
            futures::pin_mut!(notified);

            // Register before checking so a reset landing between the check and the
            // await still wakes us.
            notified.as_mut().enable();

            if let Some(admission) = self.try_admit()? {
                return Ok(admission);
            }

            tracing::trace!(limit = self.limit, "window.admit.waiting");
            notified.await;
        }
    } // end method admit

    /// Open window `window_index` with a zero count and wake every waiter.
    ///
    /// Only the reset timer calls this, so a plain store is enough.
    pub(crate) fn reset(&self, window_index: u32) {
        self.word.store(pack(window_index, 0), Ordering::Release);

        let elapsed_ms = u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.window_started_ms.store(elapsed_ms, Ordering::Release);

        self.notify.notify_waiters();
    } // end method reset

    /// Returns `true` if this call performed the transition.
    pub(crate) fn close(&self) -> bool {
        let transitioned = !self.closed.swap(true, Ordering::AcqRel);

        if transitioned {
            self.notify.notify_waiters();
        }

        transitioned
    } // end method close

    /// Milliseconds until the current window is scheduled to end.
    pub(crate) fn retry_after_ms(&self, window_ms: u64) -> u64 {
        let started_ms = self.window_started_ms.load(Ordering::Acquire);
        let elapsed_ms = u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX);
        let in_window_ms = elapsed_ms.saturating_sub(started_ms);

        window_ms.saturating_sub(in_window_ms)
    } // end method retry_after_ms
} // end of impl
