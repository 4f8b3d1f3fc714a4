use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::sync::oneshot;

use crate::{
    WindowGateError,
    runtime::{new_interval, spawn_task, tick},
    window_state::WindowState,
};

pub(crate) struct ResetTimerOptions {
    pub state: Arc<WindowState>,
    pub window_duration: Duration,
    /// Instant of the first reset; the window before it is opened at construction.
    pub first_reset_at: Instant,
}

/// Closes the limiter if the timer task goes away while it is still open.
///
/// Covers a panic inside the task (e.g. a Tokio runtime built without its time driver)
/// and the owning runtime dropping the task; otherwise waiters would never see another
/// reset.
struct TimerGuard {
    state: Arc<WindowState>,
}

impl Drop for TimerGuard {
    fn drop(&mut self) {
        if self.state.close() {
            let (window_index, admitted) = self.state.snapshot();
            tracing::error!(
                window_index,
                admitted,
                "window.reset_timer.aborted, closing limiter"
            );
        }
    }
}

/// Background task that opens a fresh window every `window_duration`.
pub(crate) struct ResetTimer; // end struct ResetTimer

impl ResetTimer {
    /// Spawn the timer; it runs until the returned sender fires or is dropped.
    pub fn run(options: ResetTimerOptions) -> Result<oneshot::Sender<()>, WindowGateError> {
        let ResetTimerOptions {
            state,
            window_duration,
            first_reset_at,
        } = options;

        let (tx, mut rx) = oneshot::channel::<()>();

        spawn_task(move || {
            // Owned by the task future from the start, so it also fires if the task is
            // dropped before its first poll.
            let guard = TimerGuard { state };

            async move {
                let state = &guard.state;

                let mut interval = new_interval(first_reset_at, window_duration);
                let (mut window_index, _) = state.snapshot();

                loop {
                    let tick_fut = tick(&mut interval);
                    futures::pin_mut!(tick_fut);

                    match futures::future::select(tick_fut, &mut rx).await {
                        futures::future::Either::Left((_tick, _rx)) => {
                            if state.is_closed() {
                                break;
                            }

                            window_index = window_index.wrapping_add(1);
                            state.reset(window_index);

                            tracing::debug!(window_index, "window.reset");
                        }
                        futures::future::Either::Right((_stop, _tick_fut)) => {
                            // A dropped sender means the limiter itself is gone.
                            break;
                        }
                    }
                }

                tracing::debug!(window_index, "window.reset_timer.stopped");
            }
        })?;

        Ok(tx)
    } // end method run
} // end impl ResetTimer
