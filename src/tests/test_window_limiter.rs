use std::{
    collections::BTreeMap,
    time::{Duration, Instant},
};

use futures::future::join_all;

use super::runtime::{async_sleep, block_on};
use crate::{
    AdmissionDecision, AdmissionLimit, WindowDuration, WindowLimiter, WindowLimiterOptions,
};

fn limiter(window_ms: u64, limit: u32) -> WindowLimiter {
    WindowLimiter::new(WindowLimiterOptions {
        window_duration: WindowDuration::try_from(window_ms).unwrap(),
        limit: AdmissionLimit::try_from(limit).unwrap(),
    })
    .unwrap()
}

#[test]
fn acquire_is_immediate_while_under_limit() {
    block_on(async {
        let limiter = limiter(60_000, 3);
        assert_eq!(limiter.available(), 3);

        let started = Instant::now();
        for expected_slot in 1..=3 {
            let admission = limiter.acquire().await.unwrap();
            assert_eq!(admission.window_index(), 0);
            assert_eq!(admission.slot(), expected_slot);
        }

        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(limiter.available(), 0);
    });
}

#[test]
fn accessors_report_configuration() {
    block_on(async {
        let limiter = limiter(750, 4);

        assert_eq!(*limiter.limit(), 4);
        assert_eq!(*limiter.window_duration(), Duration::from_millis(750));
        assert!(!limiter.is_closed());
    });
}

#[test]
fn try_acquire_rejects_when_window_is_spent() {
    block_on(async {
        let limiter = limiter(60_000, 2);

        assert!(matches!(
            limiter.try_acquire().unwrap(),
            AdmissionDecision::Allowed(_)
        ));
        assert!(matches!(
            limiter.try_acquire().unwrap(),
            AdmissionDecision::Allowed(_)
        ));

        let AdmissionDecision::Rejected {
            window_duration_ms,
            retry_after_ms,
        } = limiter.try_acquire().unwrap()
        else {
            panic!("expected rejected decision");
        };

        assert_eq!(window_duration_ms, 60_000);
        assert!(retry_after_ms <= 60_000);
        assert!(retry_after_ms > 50_000);
    });
}

#[test]
fn callers_beyond_limit_wait_for_reset() {
    block_on(async {
        let window = Duration::from_millis(200);
        let started = Instant::now();
        let limiter = &limiter(200, 3);

        let results = join_all((0..8).map(|_| async move {
            let admission = limiter.acquire().await.unwrap();
            (admission, started.elapsed())
        }))
        .await;

        let mut per_window: BTreeMap<u32, u32> = BTreeMap::new();
        for (admission, elapsed) in &results {
            *per_window.entry(admission.window_index()).or_default() += 1;
            assert!(
                *elapsed >= window * admission.window_index(),
                "admitted in window {} after only {:?}",
                admission.window_index(),
                elapsed
            );
        }

        assert_eq!(per_window.get(&0), Some(&3));
        assert!(per_window.values().all(|count| *count <= 3));
        assert_eq!(per_window.values().sum::<u32>(), 8);
    });
}

#[test]
fn reset_restores_full_capacity() {
    block_on(async {
        let limiter = limiter(500, 2);

        limiter.acquire().await.unwrap();
        limiter.acquire().await.unwrap();
        assert_eq!(limiter.available(), 0);

        // Lands mid-way through window 1.
        async_sleep(Duration::from_millis(700)).await;

        // Nothing was "released": capacity comes back from the reset alone.
        assert_eq!(limiter.available(), 2);

        let started = Instant::now();
        let first = limiter.acquire().await.unwrap();
        let second = limiter.acquire().await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(100));

        assert!(first.window_index() >= 1);
        assert_eq!(first.window_index(), second.window_index());
        assert_eq!((first.slot(), second.slot()), (1, 2));
    });
}

#[test]
fn guard_runs_operation_after_admission() {
    block_on(async {
        let limiter = limiter(60_000, 1);

        let slot = limiter
            .guard(|admission| async move { admission.slot() })
            .await
            .unwrap();
        assert_eq!(slot, 1);
        assert_eq!(limiter.available(), 0);
    });
}

#[test]
fn guard_passes_operation_errors_through() {
    block_on(async {
        let limiter = limiter(60_000, 2);

        let outcome: Result<(), String> = limiter
            .guard(|_| async { Err("downstream returned 503".to_string()) })
            .await
            .unwrap();
        assert_eq!(outcome, Err("downstream returned 503".to_string()));

        // A failed operation does not give its slot back.
        assert_eq!(limiter.available(), 1);
    });
}

#[cfg(feature = "runtime-tokio")]
#[test]
fn parallel_tasks_never_exceed_limit_per_window() {
    use std::sync::Arc;

    const LIMIT: u32 = 5;
    const CALLERS: u32 = LIMIT + 15;

    block_on(async {
        let limiter = Arc::new(limiter(100, LIMIT));

        let handles: Vec<_> = (0..CALLERS)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.acquire().await.unwrap() })
            })
            .collect();

        let mut per_window: BTreeMap<u32, u32> = BTreeMap::new();
        for handle in handles {
            let admission = handle.await.unwrap();
            *per_window.entry(admission.window_index()).or_default() += 1;
        }

        assert_eq!(per_window.get(&0), Some(&LIMIT));
        for (window_index, count) in &per_window {
            assert!(
                *count <= LIMIT,
                "window {window_index} admitted {count} > {LIMIT}"
            );
        }
        assert_eq!(per_window.values().sum::<u32>(), CALLERS);
    });
}
