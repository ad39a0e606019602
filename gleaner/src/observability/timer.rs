//! Wall-clock timers for fetch spans.

use std::time::{Duration, Instant};

/// Measures how long a named operation takes.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
    name: &'static str,
}

impl SpanTimer {
    /// Starts a new span timer.
    #[must_use]
    pub fn start(name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            name,
        }
    }

    /// Returns the span name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the elapsed time.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed().as_secs_f64() * 1000.0
    }

    /// Finishes the span, logging and returning its duration.
    pub fn finish(self) -> Duration {
        let elapsed = self.elapsed();
        tracing::trace!(
            span_name = self.name,
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            "Span finished"
        );
        elapsed
    }
}
