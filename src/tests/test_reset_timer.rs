use std::{thread, time::Duration};

use tokio::sync::oneshot;

use super::runtime::{async_sleep, block_on};
use crate::{WindowGateError, WindowLimiter};

/// Fires after `after` on a plain thread, so it works without any runtime timer.
fn deadline(after: Duration) -> oneshot::Receiver<()> {
    let (tx, rx) = oneshot::channel();
    thread::spawn(move || {
        thread::sleep(after);
        let _ = tx.send(());
    });
    rx
}

#[test]
fn timer_keeps_resetting_windows() {
    block_on(async {
        let limiter = WindowLimiter::with_quota(Duration::from_millis(30), 1).unwrap();

        let first = limiter.acquire().await.unwrap();
        let second = limiter.acquire().await.unwrap();
        let third = limiter.acquire().await.unwrap();

        assert_eq!(first.window_index(), 0);
        assert!(second.window_index() > first.window_index());
        assert!(third.window_index() > second.window_index());
        assert!(!limiter.is_closed());
    });
}

#[cfg(feature = "runtime-tokio")]
#[test]
fn timer_without_time_driver_closes_limiter() {
    // Time driver deliberately left disabled: the timer task dies on its first poll.
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .build()
        .unwrap();

    rt.block_on(async {
        let limiter = WindowLimiter::with_quota(Duration::from_millis(50), 1).unwrap();

        // Either takes the only slot or already sees the limiter closed.
        let _ = limiter.try_acquire();

        let err = limiter
            .acquire_until(deadline(Duration::from_secs(2)))
            .await
            .unwrap_err();

        assert_eq!(err, WindowGateError::Closed);
        assert!(limiter.is_closed());
    });
}

#[cfg(feature = "runtime-tokio")]
#[test]
fn dropping_the_timer_runtime_closes_limiter() {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    let limiter = rt
        .block_on(async { WindowLimiter::with_quota(Duration::from_secs(60), 1) })
        .unwrap();
    limiter.try_acquire().unwrap();
    assert!(!limiter.is_closed());

    drop(rt);

    assert!(limiter.is_closed());
    assert_eq!(
        futures::executor::block_on(limiter.acquire()).unwrap_err(),
        WindowGateError::Closed
    );
}

#[test]
fn shutdown_stops_timer_without_error() {
    block_on(async {
        let limiter = WindowLimiter::with_quota(Duration::from_millis(20), 1).unwrap();
        limiter.acquire().await.unwrap();

        limiter.shutdown();
        async_sleep(Duration::from_millis(60)).await;

        let (window_index, admitted) = limiter.state().snapshot();
        assert_eq!((window_index, admitted), (0, 1));
    });
}
