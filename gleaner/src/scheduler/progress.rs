//! Batch progress tracking.

use serde::{Deserialize, Serialize};

use crate::fetch::FetchResult;

/// Progress of one batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchProgress {
    /// Number of completed fetches.
    pub completed: usize,
    /// Total number of fetches.
    pub total: usize,
    /// Most recently completed URL.
    pub current_url: Option<String>,
    /// Number of successful fetches.
    pub success_count: usize,
    /// Number of failed fetches.
    pub error_count: usize,
    /// Number of results served from the cache.
    pub cached_count: usize,
}

impl FetchProgress {
    /// Creates a tracker for `total` fetches.
    #[must_use]
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Default::default()
        }
    }

    /// Returns the completion percentage.
    #[must_use]
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            #[allow(clippy::cast_precision_loss)]
            let ratio = self.completed as f64 / self.total as f64;
            ratio * 100.0
        }
    }

    /// Whether every fetch has completed.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.completed >= self.total
    }

    /// Counts one completed fetch.
    pub fn record(&mut self, result: &FetchResult) {
        self.completed += 1;
        if result.success {
            self.success_count += 1;
        } else {
            self.error_count += 1;
        }
        if result.from_cache {
            self.cached_count += 1;
        }
        self.current_url = Some(result.url.clone());
    }
}
