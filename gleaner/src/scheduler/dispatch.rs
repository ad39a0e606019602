//! Concurrency-bounded batch fan-out.

use futures::{FutureExt, StreamExt};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tracing::{error, info, warn};

use super::BatchStream;
use crate::cancellation::CancellationToken;
use crate::config::{CachePolicy, FetchOptions};
use crate::errors::{EngineError, ErrorKind};
use crate::fetch::{FetchLimits, FetchRequest, FetchResult, Fetcher};

/// Fans a batch of URLs out to the fetcher and streams results back.
///
/// At most `max_concurrency` fetches are in flight per batch. Each URL is
/// fetched by an independent task, so one slow or failing URL never holds
/// up the others.
#[derive(Debug, Clone)]
pub struct Scheduler {
    fetcher: Arc<Fetcher>,
}

impl Scheduler {
    /// Creates a scheduler over a shared fetcher.
    #[must_use]
    pub fn new(fetcher: Arc<Fetcher>) -> Self {
        Self { fetcher }
    }

    /// Returns the fetcher.
    #[must_use]
    pub fn fetcher(&self) -> &Arc<Fetcher> {
        &self.fetcher
    }

    /// Starts fetching `urls` and returns their results in completion order.
    ///
    /// Invalid options are rejected before anything is dispatched. Once
    /// `cancel` fires no further URL is dispatched; fetches already in
    /// flight finish, and every undispatched URL yields an
    /// [`ErrorKind::Cancelled`] result.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn fetch_all<I, S>(
        &self,
        urls: I,
        options: &FetchOptions,
        cancel: CancellationToken,
    ) -> Result<BatchStream, EngineError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        options.validate()?;
        let urls: Vec<String> = urls.into_iter().map(Into::into).collect();
        let total = urls.len();

        // Capacity covers the whole batch so workers never wait on the reader.
        let (tx, rx) = mpsc::channel(total.max(1));
        let dispatcher = Dispatcher {
            fetcher: Arc::clone(&self.fetcher),
            semaphore: Arc::new(Semaphore::new(options.max_concurrency)),
            cancel,
            cache_policy: options.cache_policy(),
            follow_redirects: options.follow_redirects,
            limits: FetchLimits {
                timeout: options.request_timeout,
                cache_ttl: options.cache_ttl,
            },
        };

        info!(total, max_concurrency = options.max_concurrency, "Dispatching batch");
        tokio::spawn(dispatcher.run(urls, tx));
        Ok(BatchStream::new(rx, total))
    }

    /// Fetches `urls`, invoking `callback` after each result.
    ///
    /// The callback receives the result, the number completed so far and the
    /// batch size. Callback errors and panics are logged and never abort the
    /// batch.
    pub async fn fetch_all_with_progress<I, S, F>(
        &self,
        urls: I,
        options: &FetchOptions,
        cancel: CancellationToken,
        mut callback: F,
    ) -> Result<Vec<FetchResult>, EngineError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: FnMut(&FetchResult, usize, usize) -> anyhow::Result<()>,
    {
        let mut stream = self.fetch_all(urls, options, cancel)?;
        let total = stream.total();
        let mut results = Vec::with_capacity(total);

        while let Some(result) = stream.next().await {
            let completed = stream.progress().completed;
            match std::panic::catch_unwind(AssertUnwindSafe(|| callback(&result, completed, total))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(url = %result.url, error = %e, "Progress callback failed"),
                Err(_) => warn!(url = %result.url, "Progress callback panicked"),
            }
            results.push(result);
        }

        let progress = stream.progress();
        info!(
            total,
            succeeded = progress.success_count,
            failed = progress.error_count,
            cached = progress.cached_count,
            "Batch complete"
        );
        Ok(results)
    }
}

/// State owned by the background task of one batch.
struct Dispatcher {
    fetcher: Arc<Fetcher>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    cache_policy: CachePolicy,
    follow_redirects: bool,
    limits: FetchLimits,
}

impl Dispatcher {
    async fn run(self, urls: Vec<String>, tx: mpsc::Sender<FetchResult>) {
        let mut pending = urls.into_iter();

        while let Some(url) = pending.next() {
            let permit = tokio::select! {
                biased;
                () = self.cancel.cancelled() => None,
                permit = Arc::clone(&self.semaphore).acquire_owned() => permit.ok(),
            };

            let Some(permit) = permit else {
                let reason = self.cancel.reason();
                info!(skipped = pending.len() + 1, reason = ?reason, "Batch cancelled");
                for url in std::iter::once(url).chain(pending) {
                    let result = self.fetcher.skip(&url, reason.as_deref()).await;
                    if tx.send(result).await.is_err() {
                        return;
                    }
                }
                return;
            };

            let request = FetchRequest::new(url)
                .with_cache_policy(self.cache_policy)
                .with_follow_redirects(self.follow_redirects);
            let fetcher = Arc::clone(&self.fetcher);
            let tx = tx.clone();
            let limits = self.limits;

            tokio::spawn(async move {
                let result = AssertUnwindSafe(fetcher.fetch_with(&request, limits))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| {
                        error!(url = %request.url, "Fetch task panicked");
                        FetchResult::failed(&request.url, ErrorKind::Transport, "Fetch task panicked", Duration::ZERO)
                    });
                drop(permit);
                // A closed channel means the caller dropped the stream.
                let _ = tx.send(result).await;
            });
        }
    }
}
