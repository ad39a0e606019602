//! Logging and timing utilities.
//!
//! This module provides:
//! - init_tracing, which installs a `tracing-subscriber` filtered by `RUST_LOG`
//! - SpanTimer for measuring fetch durations

mod subscriber;
mod timer;

pub use subscriber::{init_tracing, LogFormat, DEFAULT_FILTER};
pub use timer::SpanTimer;
