#![doc = include_str!("../README.md")]
#![deny(missing_docs)]
#![forbid(unsafe_code)]

mod window_limiter;
pub use window_limiter::*;

mod window_state;

mod reset_timer;

mod runtime;

mod error;
pub use error::*;

mod common;
pub use common::{Admission, AdmissionDecision, AdmissionLimit, WindowDuration};

#[cfg(test)]
mod tests;
