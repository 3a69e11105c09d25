use std::cmp::Ordering;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

use bytes::Bytes;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::models::ProcessedBook;

use super::orchestrator::Orchestrator;

#[derive(Debug, Clone)]
pub struct BatchItem {
    pub book_id: String,
    pub archive: Bytes,
}

impl BatchItem {
    pub fn new(book_id: impl Into<String>, archive: impl Into<Bytes>) -> Self {
        Self {
            book_id: book_id.into(),
            archive: archive.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    pub book_id: String,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    /// In completion order.
    pub succeeded: Vec<ProcessedBook>,
    pub failed: Vec<BatchFailure>,
    /// Most items ever inside [`Orchestrator::process`] at once.
    pub peak_concurrency: usize,
}

/// Counts items currently being processed and remembers the highest count.
#[derive(Debug, Default)]
struct ActiveGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ActiveGauge {
    fn enter(self: &Arc<Self>) -> ActiveGuard {
        let now = self.current.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        self.peak.fetch_max(now, AtomicOrdering::SeqCst);
        ActiveGuard(Arc::clone(self))
    }

    fn peak(&self) -> usize {
        self.peak.load(AtomicOrdering::SeqCst)
    }
}

struct ActiveGuard(Arc<ActiveGauge>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, AtomicOrdering::SeqCst);
    }
}

impl Orchestrator {
    /// Process `items` in order, at most `limit` at a time. A finished item's
    /// slot goes to the next queued one; failures are logged and collected
    /// without stopping the batch.
    pub async fn process_batch(self: &Arc<Self>, items: Vec<BatchItem>, limit: usize) -> BatchReport {
        let limit = limit.max(1);
        let total = items.len();
        let mut queue = items.into_iter();
        let mut running = JoinSet::new();
        let mut report = BatchReport::default();
        let gauge = Arc::new(ActiveGauge::default());

        info!(total, limit, "Batch started");
        loop {
            while running.len() < limit {
                let Some(item) = queue.next() else { break };
                let orchestrator = Arc::clone(self);
                let gauge = Arc::clone(&gauge);
                running.spawn(async move {
                    let _active = gauge.enter();
                    let result = orchestrator.process(&item.book_id, item.archive).await;
                    (item.book_id, result)
                });
            }

            let Some(joined) = running.join_next().await else {
                break;
            };
            match joined {
                Ok((_, Ok(book))) => report.succeeded.push(book),
                Ok((book_id, Err(e))) => {
                    warn!(book_id, error = %e, "Batch item failed");
                    report.failed.push(BatchFailure {
                        book_id,
                        error: e.to_string(),
                    });
                }
                Err(e) => error!(error = %e, "Batch task aborted"),
            }
        }

        report.peak_concurrency = gauge.peak();
        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            peak = report.peak_concurrency,
            "Batch finished"
        );
        report
    }

    /// [`process_batch`](Self::process_batch) after a stable sort by `priority`.
    pub async fn process_batch_by<F>(
        self: &Arc<Self>,
        mut items: Vec<BatchItem>,
        limit: usize,
        priority: F,
    ) -> BatchReport
    where
        F: FnMut(&BatchItem, &BatchItem) -> Ordering,
    {
        items.sort_by(priority);
        self.process_batch(items, limit).await
    }
}
