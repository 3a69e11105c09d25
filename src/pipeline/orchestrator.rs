use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::epub;
use crate::library::Library;
use crate::models::ProcessedBook;
use crate::observability::Metrics;
use crate::render;
use crate::sync::spawn_supervised;

use super::stats::PipelineStats;
use super::{PipelineError, Result, validate_book_id};

pub const PROGRESS_PARSED: u8 = 10;
pub const PROGRESS_RENDERED: u8 = 50;
pub const PROGRESS_STORED: u8 = 80;
pub const PROGRESS_DONE: u8 = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingState {
    #[default]
    NotStarted,
    Processing,
    Processed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingStatus {
    pub book_id: String,
    pub state: ProcessingState,
    /// 0-100.
    pub progress: u8,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ProcessingStatus {
    pub fn not_started(book_id: impl Into<String>) -> Self {
        Self {
            book_id: book_id.into(),
            state: ProcessingState::NotStarted,
            progress: 0,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn is_processed(&self) -> bool {
        self.state == ProcessingState::Processed
    }

    pub fn is_processing(&self) -> bool {
        self.state == ProcessingState::Processing
    }

    pub fn duration(&self) -> Option<Duration> {
        Some(self.finished_at? - self.started_at?)
    }
}

#[derive(Default)]
struct Registry {
    statuses: HashMap<String, ProcessingStatus>,
    locked: HashSet<String>,
}

/// Processes books one id at a time and remembers how each run went.
///
/// Statuses live in memory only; after a restart every id reports
/// `not_started` again while its stored book stays readable.
pub struct Orchestrator {
    library: Library,
    metrics: Arc<Metrics>,
    registry: Mutex<Registry>,
}

/// Held for the duration of one run. Dropping it releases the book id.
struct Lease<'a> {
    orchestrator: &'a Orchestrator,
    book_id: String,
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        self.orchestrator.registry().locked.remove(&self.book_id);
    }
}

impl Orchestrator {
    pub fn new(library: Library, metrics: Arc<Metrics>) -> Self {
        Self {
            library,
            metrics,
            registry: Mutex::new(Registry::default()),
        }
    }

    pub fn library(&self) -> &Library {
        &self.library
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Parse, render and store one archive under `book_id`.
    ///
    /// Fails fast with [`PipelineError::Concurrency`] if the id is already in
    /// flight; that rejection leaves the recorded status untouched. Any other
    /// failure is recorded as `failed` and returned.
    pub async fn process(&self, book_id: &str, archive: Bytes) -> Result<ProcessedBook> {
        validate_book_id(book_id)?;
        let _lease = self.begin(book_id)?;
        self.execute(book_id, archive).await
    }

    /// Claim `book_id` now and process it on a background task.
    ///
    /// The claim happens before this returns, so a status poll right after
    /// sees `processing` and a second submit gets
    /// [`PipelineError::Concurrency`].
    pub fn submit(self: &Arc<Self>, book_id: &str, archive: Bytes) -> Result<JoinHandle<()>> {
        validate_book_id(book_id)?;
        self.claim(book_id)?;

        let orchestrator = Arc::clone(self);
        let book_id = book_id.to_string();
        Ok(spawn_supervised("process-book", async move {
            let _lease = Lease {
                orchestrator: &orchestrator,
                book_id: book_id.clone(),
            };
            orchestrator.execute(&book_id, archive).await.map(|_| ())
        }))
    }

    async fn execute(&self, book_id: &str, archive: Bytes) -> Result<ProcessedBook> {
        info!(book_id, size = archive.len(), "Processing started");

        match self.run(book_id, archive).await {
            Ok(book) => {
                self.update(book_id, |status| {
                    status.state = ProcessingState::Processed;
                    status.progress = PROGRESS_DONE;
                    status.finished_at = Some(Utc::now());
                });
                self.metrics.book_processed(book.chapters.len());
                info!(book_id, chapters = book.chapters.len(), "Processing finished");
                Ok(book)
            }
            Err(e) => {
                let message = e.to_string();
                self.update(book_id, |status| {
                    status.state = ProcessingState::Failed;
                    status.error = Some(message);
                    status.finished_at = Some(Utc::now());
                });
                self.metrics.book_failed();
                warn!(book_id, error = %e, "Processing failed");
                Err(e)
            }
        }
    }

    async fn run(&self, book_id: &str, archive: Bytes) -> Result<ProcessedBook> {
        let id = book_id.to_string();
        let book = tokio::task::spawn_blocking(move || epub::parse(&id, &archive)).await??;
        self.set_progress(book_id, PROGRESS_PARSED);

        let rendered = render::render(&book);
        self.set_progress(book_id, PROGRESS_RENDERED);

        self.library.store(&book, &rendered).await?;
        self.set_progress(book_id, PROGRESS_STORED);
        Ok(book)
    }

    fn begin(&self, book_id: &str) -> Result<Lease<'_>> {
        self.claim(book_id)?;
        Ok(Lease {
            orchestrator: self,
            book_id: book_id.to_string(),
        })
    }

    /// Lock `book_id` and record it as `processing`. The caller owns
    /// releasing the lock.
    fn claim(&self, book_id: &str) -> Result<()> {
        let mut registry = self.registry();
        if !registry.locked.insert(book_id.to_string()) {
            debug!(book_id, "Rejected concurrent processing request");
            return Err(PipelineError::Concurrency(book_id.to_string()));
        }

        let mut status = ProcessingStatus::not_started(book_id);
        status.state = ProcessingState::Processing;
        status.started_at = Some(Utc::now());
        registry.statuses.insert(book_id.to_string(), status);
        Ok(())
    }

    fn update(&self, book_id: &str, apply: impl FnOnce(&mut ProcessingStatus)) {
        if let Some(status) = self.registry().statuses.get_mut(book_id) {
            apply(status);
        }
    }

    fn set_progress(&self, book_id: &str, progress: u8) {
        self.update(book_id, |status| status.progress = progress);
        debug!(book_id, progress, "Processing progress");
    }

    /// Last recorded status; unknown ids are `not_started`.
    pub fn status(&self, book_id: &str) -> ProcessingStatus {
        self.registry()
            .statuses
            .get(book_id)
            .cloned()
            .unwrap_or_else(|| ProcessingStatus::not_started(book_id))
    }

    pub fn is_locked(&self, book_id: &str) -> bool {
        self.registry().locked.contains(book_id)
    }

    /// Clear a `failed` status so the book can be submitted again. Returns
    /// whether anything was cleared; an id that is in flight or not failed is
    /// left alone.
    pub fn reset_failed(&self, book_id: &str) -> bool {
        let mut registry = self.registry();
        if registry.locked.contains(book_id) {
            return false;
        }
        let failed = registry
            .statuses
            .get(book_id)
            .is_some_and(|s| s.state == ProcessingState::Failed);
        if failed {
            registry.statuses.remove(book_id);
            debug!(book_id, "Failed status cleared");
        }
        failed
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats::collect(self.registry().statuses.values())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::fixtures::EpubFixture;
    use crate::ledger::LedgerStore;
    use crate::storage::StorageClient;
    use crate::sync::{ManualConnectivity, SyncEngine};
    use tempfile::TempDir;

    fn orchestrator(dir: &TempDir) -> Arc<Orchestrator> {
        let ledger = LedgerStore::open(dir.path().join("ledger")).unwrap();
        let metrics = Arc::new(Metrics::new());
        let sync = Arc::new(SyncEngine::new(
            ledger.clone(),
            StorageClient::in_memory(),
            Arc::new(ManualConnectivity::new(false)),
            metrics.clone(),
            SyncConfig::default(),
        ));
        Arc::new(Orchestrator::new(Library::new(ledger, sync), metrics))
    }

    #[tokio::test]
    async fn test_process_records_progress() {
        let dir = TempDir::new().unwrap();
        let orchestrator = orchestrator(&dir);
        assert_eq!(orchestrator.status("book-1").state, ProcessingState::NotStarted);

        let book = orchestrator
            .process("book-1", Bytes::from(EpubFixture::sample().build()))
            .await
            .unwrap();
        assert_eq!(book.id, "book-1");

        let status = orchestrator.status("book-1");
        assert!(status.is_processed());
        assert!(!status.is_processing());
        assert_eq!(status.progress, PROGRESS_DONE);
        assert!(status.duration().is_some());
        assert!(!orchestrator.is_locked("book-1"));
        assert!(orchestrator.library().ledger().contains_book("book-1").unwrap());
    }

    #[tokio::test]
    async fn test_failure_then_reset() {
        let dir = TempDir::new().unwrap();
        let orchestrator = orchestrator(&dir);

        let err = orchestrator
            .process("bad", Bytes::from_static(b"not a zip"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Epub(_)));

        let status = orchestrator.status("bad");
        assert_eq!(status.state, ProcessingState::Failed);
        assert!(status.error.is_some());
        assert_eq!(orchestrator.stats().failed, 1);

        assert!(orchestrator.reset_failed("bad"));
        assert_eq!(orchestrator.status("bad").state, ProcessingState::NotStarted);
        assert!(!orchestrator.reset_failed("bad"));
    }

    #[tokio::test]
    async fn test_invalid_id_rejected_without_state() {
        let dir = TempDir::new().unwrap();
        let orchestrator = orchestrator(&dir);
        let err = orchestrator
            .process("../escape", Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidBookId(_)));
        assert_eq!(orchestrator.status("../escape").state, ProcessingState::NotStarted);
    }

    #[tokio::test]
    async fn test_submit_claims_before_returning() {
        let dir = TempDir::new().unwrap();
        let orchestrator = orchestrator(&dir);
        let archive = Bytes::from(EpubFixture::sample().build());

        let handle = orchestrator.submit("book-1", archive.clone()).unwrap();
        assert!(matches!(
            orchestrator.submit("book-1", archive.clone()),
            Err(PipelineError::Concurrency(_))
        ));

        handle.await.unwrap();
        assert!(orchestrator.status("book-1").is_processed());
        assert!(!orchestrator.is_locked("book-1"));
        orchestrator.submit("book-1", archive).unwrap().await.unwrap();
    }

    #[tokio::test]
    async fn test_lease_blocks_second_run() {
        let dir = TempDir::new().unwrap();
        let orchestrator = orchestrator(&dir);

        let lease = orchestrator.begin("book-1").unwrap();
        assert!(matches!(
            orchestrator.begin("book-1"),
            Err(PipelineError::Concurrency(_))
        ));
        assert!(!orchestrator.reset_failed("book-1"));
        drop(lease);

        assert!(orchestrator.begin("book-1").is_ok());
    }
}
