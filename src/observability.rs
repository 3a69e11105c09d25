//! Process-wide counters (books, chapters, syncs)

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics handle for recording counters
#[derive(Debug, Default)]
pub struct Metrics {
    books_processed: AtomicU64,
    books_failed: AtomicU64,
    chapters_rendered: AtomicU64,
    syncs_succeeded: AtomicU64,
    syncs_failed: AtomicU64,
    chapter_uploads_failed: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn book_processed(&self, chapters: usize) {
        self.books_processed.fetch_add(1, Ordering::Relaxed);
        self.chapters_rendered
            .fetch_add(chapters as u64, Ordering::Relaxed);
        tracing::debug!(counter = "books_processed", chapters, "Metric incremented");
    }

    pub fn book_failed(&self) {
        self.books_failed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "books_failed", "Metric incremented");
    }

    pub fn sync_succeeded(&self) {
        self.syncs_succeeded.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "syncs_succeeded", "Metric incremented");
    }

    pub fn sync_failed(&self) {
        self.syncs_failed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "syncs_failed", "Metric incremented");
    }

    pub fn chapter_upload_failed(&self) {
        self.chapter_uploads_failed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "chapter_uploads_failed", "Metric incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            books_processed: self.books_processed.load(Ordering::Relaxed),
            books_failed: self.books_failed.load(Ordering::Relaxed),
            chapters_rendered: self.chapters_rendered.load(Ordering::Relaxed),
            syncs_succeeded: self.syncs_succeeded.load(Ordering::Relaxed),
            syncs_failed: self.syncs_failed.load(Ordering::Relaxed),
            chapter_uploads_failed: self.chapter_uploads_failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub books_processed: u64,
    pub books_failed: u64,
    pub chapters_rendered: u64,
    pub syncs_succeeded: u64,
    pub syncs_failed: u64,
    pub chapter_uploads_failed: u64,
}

/// Install the global `tracing` subscriber. `RUST_LOG` wins over
/// `default_filter`.
pub fn init_tracing(default_filter: &str) {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_counts() {
        let metrics = Metrics::new();
        metrics.book_processed(3);
        metrics.book_processed(2);
        metrics.book_failed();
        metrics.sync_succeeded();
        metrics.chapter_upload_failed();

        let snap = metrics.snapshot();
        assert_eq!(snap.books_processed, 2);
        assert_eq!(snap.chapters_rendered, 5);
        assert_eq!(snap.books_failed, 1);
        assert_eq!(snap.syncs_succeeded, 1);
        assert_eq!(snap.syncs_failed, 0);
        assert_eq!(snap.chapter_uploads_failed, 1);
    }
}
