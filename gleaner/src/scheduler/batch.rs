//! Completion-ordered stream of batch results.

use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use super::FetchProgress;
use crate::fetch::FetchResult;

/// Results of one batch, yielded in completion order.
///
/// Yields exactly one result per submitted URL, then ends.
#[derive(Debug)]
pub struct BatchStream {
    rx: mpsc::Receiver<FetchResult>,
    progress: FetchProgress,
}

impl BatchStream {
    pub(crate) fn new(rx: mpsc::Receiver<FetchResult>, total: usize) -> Self {
        Self {
            rx,
            progress: FetchProgress::new(total),
        }
    }

    /// Number of URLs in the batch.
    #[must_use]
    pub fn total(&self) -> usize {
        self.progress.total
    }

    /// Progress so far, counting results already yielded.
    #[must_use]
    pub fn progress(&self) -> &FetchProgress {
        &self.progress
    }

    /// Waits for every remaining result.
    pub async fn collect_all(mut self) -> Vec<FetchResult> {
        let mut results = Vec::with_capacity(self.progress.total.saturating_sub(self.progress.completed));
        while let Some(result) = self.rx.recv().await {
            self.progress.record(&result);
            results.push(result);
        }
        results
    }
}

impl Stream for BatchStream {
    type Item = FetchResult;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = self.rx.poll_recv(cx);
        if let Poll::Ready(Some(ref result)) = polled {
            self.progress.record(result);
        }
        polled
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.progress.total.saturating_sub(self.progress.completed);
        (remaining, Some(remaining))
    }
}
