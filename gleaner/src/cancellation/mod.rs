//! Cooperative cancellation of fetch batches.

mod token;

pub use token::{CancelCallback, CancellationToken};
