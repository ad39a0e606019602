//! Batch scheduling.
//!
//! This module provides:
//! - Scheduler, which bounds in-flight fetches with a semaphore and spawns one task per URL
//! - BatchStream, the completion-ordered stream of results
//! - FetchProgress, a running tally of a batch

mod batch;
mod dispatch;
mod progress;

#[cfg(test)]
mod integration_tests;

pub use batch::BatchStream;
pub use dispatch::Scheduler;
pub use progress::FetchProgress;
