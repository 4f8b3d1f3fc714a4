/// Error type for this crate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WindowGateError {
    /// A limit or window duration was rejected at construction time.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The limiter was shut down; no further admissions are granted.
    #[error("window limiter is closed")]
    Closed,

    /// A blocked acquire was aborted by its cancellation signal or deadline.
    #[error("acquire was cancelled before admission")]
    Cancelled,

    /// No async runtime was available to drive the reset timer.
    #[error("no async runtime available to run the reset timer")]
    RuntimeUnavailable,
}
