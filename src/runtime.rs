use std::{
    future::Future,
    time::{Duration, Instant},
};

use crate::WindowGateError;

#[cfg(not(any(feature = "runtime-tokio", feature = "runtime-smol")))]
compile_error!("enable one of the `runtime-tokio` or `runtime-smol` features");

#[cfg(feature = "runtime-tokio")]
pub(crate) type Interval = tokio::time::Interval;

#[cfg(all(feature = "runtime-smol", not(feature = "runtime-tokio")))]
pub(crate) type Interval = smol::Timer;

/// Interval whose first tick lands at `start`, then every `period`.
#[cfg(feature = "runtime-tokio")]
pub(crate) fn new_interval(start: Instant, period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(tokio::time::Instant::from_std(start), period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval
}

#[cfg(all(feature = "runtime-smol", not(feature = "runtime-tokio")))]
pub(crate) fn new_interval(start: Instant, period: Duration) -> Interval {
    smol::Timer::interval_at(start, period)
}

/// Build the task with `make_task` only once a runtime is known to be available.
#[cfg(feature = "runtime-tokio")]
pub(crate) fn spawn_task<M, F>(make_task: M) -> Result<(), WindowGateError>
where
    M: FnOnce() -> F,
    F: Future<Output = ()> + Send + 'static,
{
    let handle = tokio::runtime::Handle::try_current()
        .map_err(|_| WindowGateError::RuntimeUnavailable)?;

    handle.spawn(make_task());

    Ok(())
}

#[cfg(all(feature = "runtime-smol", not(feature = "runtime-tokio")))]
pub(crate) fn spawn_task<M, F>(make_task: M) -> Result<(), WindowGateError>
where
    M: FnOnce() -> F,
    F: Future<Output = ()> + Send + 'static,
{
    smol::spawn(make_task()).detach();

    Ok(())
}

#[cfg(feature = "runtime-tokio")]
pub(crate) async fn tick(interval: &mut Interval) {
    interval.tick().await;
}

#[cfg(all(feature = "runtime-smol", not(feature = "runtime-tokio")))]
pub(crate) async fn tick(interval: &mut Interval) {
    use futures::StreamExt;
    interval.next().await;
}

#[cfg(feature = "runtime-tokio")]
pub(crate) async fn sleep(duration: Duration) {
    tokio::time::sleep(duration).await;
}

#[cfg(all(feature = "runtime-smol", not(feature = "runtime-tokio")))]
pub(crate) async fn sleep(duration: Duration) {
    smol::Timer::after(duration).await;
}
