use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::ledger::LedgerStore;
use crate::models::{BookRecord, CatalogEntry, StoredBook, SyncState, SyncStatus};
use crate::observability::Metrics;
use crate::storage::{StorageClient, layout};

use super::connectivity::Connectivity;
use super::supervisor::spawn_supervised;
use super::{Result, SyncError};

/// Outcome of a sync pass over one or more books.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub attempted: usize,
    pub synced: usize,
    pub failed: usize,
}

impl SyncReport {
    fn record(&mut self, status: &SyncStatus) {
        self.attempted += 1;
        match status.status {
            SyncState::Synced => self.synced += 1,
            SyncState::Error => self.failed += 1,
            SyncState::Pending | SyncState::Syncing => {}
        }
    }
}

#[derive(Debug, Default)]
struct ChapterOutcome {
    uploaded: usize,
    failed: Vec<String>,
}

/// Drives replication of ledger books to the remote store.
pub struct SyncEngine {
    ledger: LedgerStore,
    remote: StorageClient,
    connectivity: Arc<dyn Connectivity>,
    metrics: Arc<Metrics>,
    config: SyncConfig,
    in_flight: Mutex<HashSet<String>>,
    bucket_ready: OnceCell<()>,
}

/// Removes the book from the in-flight set when the sync ends, however it ends.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<String>>,
    book_id: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut set = self.set.lock().unwrap_or_else(|e| e.into_inner());
        set.remove(&self.book_id);
    }
}

impl SyncEngine {
    pub fn new(
        ledger: LedgerStore,
        remote: StorageClient,
        connectivity: Arc<dyn Connectivity>,
        metrics: Arc<Metrics>,
        config: SyncConfig,
    ) -> Self {
        Self {
            ledger,
            remote,
            connectivity,
            metrics,
            config,
            in_flight: Mutex::new(HashSet::new()),
            bucket_ready: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub async fn is_online(&self) -> bool {
        self.connectivity.is_online().await
    }

    /// Current record for `book_id`, if the book has one.
    pub fn status(&self, book_id: &str) -> Result<Option<SyncStatus>> {
        Ok(self.ledger.get_sync_status(book_id)?)
    }

    fn claim(&self, book_id: &str) -> Option<InFlight<'_>> {
        let mut set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(book_id.to_string()) {
            return None;
        }
        Some(InFlight {
            set: &self.in_flight,
            book_id: book_id.to_string(),
        })
    }

    /// Books this engine is uploading right now.
    fn in_flight_ids(&self) -> HashSet<String> {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    async fn ensure_bucket(&self) -> Result<()> {
        self.bucket_ready
            .get_or_try_init(|| self.remote.ensure_bucket())
            .await?;
        Ok(())
    }

    /// Upload one book and record the outcome on its sync status.
    ///
    /// Upload failures are not errors here: they end up as an `error` status
    /// in the returned record. `Err` means the ledger itself could not be
    /// read or written, or the book is not stored locally.
    pub async fn sync_book(&self, book_id: &str) -> Result<SyncStatus> {
        let Some(_claim) = self.claim(book_id) else {
            debug!(book_id, "Sync already in progress");
            return Ok(self
                .ledger
                .get_sync_status(book_id)?
                .unwrap_or_else(|| SyncStatus::pending(book_id)));
        };

        let record = self
            .ledger
            .get_record(book_id)?
            .ok_or_else(|| SyncError::BookNotFound(book_id.to_string()))?;

        let mut status = self
            .ledger
            .get_sync_status(book_id)?
            .unwrap_or_else(|| SyncStatus::pending(book_id));
        status.mark_syncing();
        status.chapters_total = record.chapter_ids.len();
        self.ledger.put_sync_status(&status)?;
        info!(book_id, chapters = record.chapter_ids.len(), "Sync started");

        if let Err(e) = self.ensure_bucket().await {
            return self.fail(status, format!("remote bucket unavailable: {e}"));
        }
        if let Err(e) = self.upload_book_data(&record).await {
            return self.fail(status, format!("failed to upload book data: {e}"));
        }

        let outcome = self.upload_chapters(&record).await;
        self.upload_resources(&record).await;
        self.prune_stale(&record, &outcome.failed).await;

        let total = record.chapter_ids.len();
        status.chapters_uploaded = outcome.uploaded;
        match threshold_error(outcome.uploaded, total, self.config.success_threshold) {
            Some(message) => {
                status.failed_chapters = outcome.failed;
                self.fail(status, message)
            }
            None => {
                if !outcome.failed.is_empty() {
                    warn!(
                        book_id,
                        missing = outcome.failed.len(),
                        "Book synced with chapters missing remotely"
                    );
                }
                status.mark_synced(outcome.uploaded, total, outcome.failed);
                self.save_status(&status)?;
                self.metrics.sync_succeeded();
                info!(book_id, uploaded = outcome.uploaded, total, "Sync finished");
                Ok(status)
            }
        }
    }

    fn fail(&self, mut status: SyncStatus, message: String) -> Result<SyncStatus> {
        warn!(book_id = %status.book_id, error = %message, "Sync failed");
        status.mark_error(message);
        self.save_status(&status)?;
        self.metrics.sync_failed();
        Ok(status)
    }

    /// A book deleted while its sync ran must not get its queue entry back.
    fn save_status(&self, status: &SyncStatus) -> Result<()> {
        if self.ledger.contains_book(&status.book_id)? {
            self.ledger.put_sync_status(status)?;
        } else {
            debug!(book_id = %status.book_id, "Book deleted during sync, dropping status");
        }
        Ok(())
    }

    async fn upload_book_data(&self, record: &BookRecord) -> Result<()> {
        let id = record.id.as_str();
        let index = self
            .ledger
            .get_index(id)?
            .ok_or_else(|| SyncError::BookNotFound(id.to_string()))?;
        let styles = self.ledger.get_styles(id)?.unwrap_or_default();

        self.remote
            .upload(
                &layout::book_data_key(id),
                serde_json::to_vec(record)?,
                layout::CONTENT_TYPE_JSON,
            )
            .await?;
        self.remote
            .upload(&layout::index_key(id), index, layout::CONTENT_TYPE_HTML)
            .await?;
        self.remote
            .upload(&layout::styles_key(id), styles, layout::CONTENT_TYPE_CSS)
            .await?;
        Ok(())
    }

    /// One chapter at a time, in spine order.
    async fn upload_chapters(&self, record: &BookRecord) -> ChapterOutcome {
        let total = record.chapter_ids.len();
        let mut outcome = ChapterOutcome::default();

        for (position, chapter_id) in record.chapter_ids.iter().enumerate() {
            match self.upload_chapter(&record.id, chapter_id).await {
                Ok(()) => {
                    outcome.uploaded += 1;
                    debug!(
                        book_id = %record.id,
                        chapter_id,
                        progress = position + 1,
                        total,
                        "Chapter uploaded"
                    );
                }
                Err(e) => {
                    warn!(book_id = %record.id, chapter_id, error = %e, "Chapter upload failed");
                    self.metrics.chapter_upload_failed();
                    outcome.failed.push(chapter_id.clone());
                }
            }
        }
        outcome
    }

    async fn upload_chapter(&self, book_id: &str, chapter_id: &str) -> Result<()> {
        let html = self.ledger.get_chapter(book_id, chapter_id)?.ok_or_else(|| {
            SyncError::ChapterNotFound {
                book_id: book_id.to_string(),
                chapter_id: chapter_id.to_string(),
            }
        })?;
        self.remote
            .upload(
                &layout::chapter_key(book_id, chapter_id),
                html,
                layout::CONTENT_TYPE_HTML,
            )
            .await?;
        Ok(())
    }

    /// Best effort; resources do not count towards the success threshold.
    async fn upload_resources(&self, record: &BookRecord) {
        for href in &record.resource_hrefs {
            let data = match self.ledger.get_resource(&record.id, href) {
                Ok(Some(data)) => data,
                Ok(None) => continue,
                Err(e) => {
                    warn!(book_id = %record.id, href, error = %e, "Failed to read resource");
                    continue;
                }
            };
            let content_type = mime_guess::from_path(href).first_or_octet_stream();
            if let Err(e) = self
                .remote
                .upload(
                    &layout::resource_key(&record.id, href),
                    data,
                    content_type.essence_str(),
                )
                .await
            {
                warn!(book_id = %record.id, href, error = %e, "Resource upload failed");
            }
        }
    }

    /// Remove remote chapters and resources the current record does not
    /// list, such as those of an earlier version of the book. A chapter whose
    /// upload just failed goes too, so no outdated copy is served.
    async fn prune_stale(&self, record: &BookRecord, failed_chapters: &[String]) {
        let id = record.id.as_str();
        let chapters: Vec<String> = record
            .chapter_ids
            .iter()
            .filter(|chapter_id| !failed_chapters.contains(chapter_id))
            .map(|chapter_id| layout::chapter_key(id, chapter_id))
            .collect();
        let resources: Vec<String> = record
            .resource_hrefs
            .iter()
            .map(|href| layout::resource_key(id, href))
            .collect();

        for (prefix, keep) in [
            (layout::chapters_prefix(id), chapters),
            (layout::resources_prefix(id), resources),
        ] {
            match self.remote.prune(&prefix, &keep).await {
                Ok(0) => {}
                Ok(removed) => {
                    debug!(book_id = id, prefix = %prefix, removed, "Removed stale remote objects");
                }
                Err(e) => {
                    warn!(book_id = id, prefix = %prefix, error = %e, "Failed to prune remote objects");
                }
            }
        }
    }

    /// Sync every `pending` book, up to `max_concurrent_books` at once.
    pub async fn sync_all_pending(&self) -> Result<SyncReport> {
        let active = self.in_flight_ids();
        let pending: Vec<_> = self
            .ledger
            .sync_ids_in(SyncState::Pending)?
            .into_iter()
            .filter(|id| !active.contains(id))
            .collect();
        if pending.is_empty() {
            return Ok(SyncReport::default());
        }
        if !self.is_online().await {
            return Err(SyncError::Offline);
        }
        info!(books = pending.len(), "Syncing pending books");

        let limit = self.config.max_concurrent_books.max(1);
        let results: Vec<_> = stream::iter(pending)
            .map(|book_id| async move {
                let result = self.sync_book(&book_id).await;
                (book_id, result)
            })
            .buffer_unordered(limit)
            .collect()
            .await;

        let mut report = SyncReport::default();
        for (book_id, result) in results {
            match result {
                Ok(status) => report.record(&status),
                Err(e) => {
                    warn!(book_id, error = %e, "Sync aborted");
                    report.attempted += 1;
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    /// Sync one book now, or every unsynced book when `book_id` is `None`.
    /// Books in `error` are reset to `pending` first.
    pub async fn force_sync(&self, book_id: Option<&str>) -> Result<SyncReport> {
        if !self.is_online().await {
            return Err(SyncError::Offline);
        }
        let Some(book_id) = book_id else {
            self.ledger.requeue_unsynced(&self.in_flight_ids())?;
            return self.sync_all_pending().await;
        };

        if !self.ledger.contains_book(book_id)? {
            return Err(SyncError::BookNotFound(book_id.to_string()));
        }
        let mut status = self
            .ledger
            .get_sync_status(book_id)?
            .unwrap_or_else(|| SyncStatus::pending(book_id));
        if status.status != SyncState::Syncing {
            status.reset_pending();
            self.ledger.put_sync_status(&status)?;
        }

        let status = self.sync_book(book_id).await?;
        let mut report = SyncReport::default();
        report.record(&status);
        Ok(report)
    }

    /// Requeue failed books and sync everything pending.
    pub async fn on_reconnect(&self) -> Result<SyncReport> {
        let requeued = self.ledger.requeue_unsynced(&self.in_flight_ids())?;
        if requeued > 0 {
            debug!(requeued, "Requeued unsynced books");
        }
        self.sync_all_pending().await
    }

    /// Fire-and-forget sync of a freshly stored book. Returns `None` when sync
    /// is disabled or the remote is unreachable; the book stays `pending`.
    pub async fn schedule(self: &Arc<Self>, book_id: &str) -> Option<JoinHandle<()>> {
        if !self.config.enabled {
            return None;
        }
        if !self.is_online().await {
            debug!(book_id, "Offline, leaving book pending");
            return None;
        }
        let engine = Arc::clone(self);
        let book_id = book_id.to_string();
        Some(spawn_supervised("sync-after-store", async move {
            engine.sync_book(&book_id).await.map(|_| ())
        }))
    }

    /// Start the delayed startup pass and the connectivity monitor.
    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        if !self.config.enabled {
            info!("Cloud sync disabled");
            return Vec::new();
        }

        let startup = Arc::clone(self);
        let startup_task = spawn_supervised("sync-startup", async move {
            tokio::time::sleep(Duration::from_millis(startup.config.startup_delay_ms)).await;
            if !startup.is_online().await {
                debug!("Offline at startup, skipping sync pass");
                return Ok(());
            }
            let report = startup.on_reconnect().await?;
            info!(
                attempted = report.attempted,
                synced = report.synced,
                failed = report.failed,
                "Startup sync finished"
            );
            Ok::<(), SyncError>(())
        });

        let monitor_task = spawn_supervised("sync-monitor", Arc::clone(self).monitor());
        vec![startup_task, monitor_task]
    }

    async fn monitor(self: Arc<Self>) -> Result<()> {
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.config.probe_interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut was_online = self.is_online().await;

        loop {
            ticker.tick().await;
            let online = self.is_online().await;
            if online && !was_online {
                info!("Connectivity restored, syncing pending books");
                if let Err(e) = self.on_reconnect().await {
                    warn!(error = %e, "Reconnect sync failed");
                }
            } else if !online && was_online {
                info!("Connectivity lost");
            }
            was_online = online;
        }
    }

    /// Whether the remote holds `book_id`. A book found remotely but not
    /// locally is imported into the ledger as a side effect.
    pub async fn is_in_cloud(&self, book_id: &str) -> Result<bool> {
        let Some(data) = self
            .remote
            .download_opt(&layout::book_data_key(book_id))
            .await?
        else {
            return Ok(false);
        };

        if !self.ledger.contains_book(book_id)? {
            let record: BookRecord = serde_json::from_slice(&data)?;
            if let Err(e) = self.import_book(record).await {
                warn!(book_id, error = %e, "Failed to import book from remote");
            }
        }
        Ok(true)
    }

    async fn import_book(&self, record: BookRecord) -> Result<()> {
        let id = record.id.clone();
        let index = text(self.remote.download(&layout::index_key(&id)).await?);
        let css = self
            .remote
            .download_opt(&layout::styles_key(&id))
            .await?
            .map(text)
            .unwrap_or_default();

        let mut missing = Vec::new();
        for chapter_id in &record.chapter_ids {
            match self.fetch_chapter(&id, chapter_id).await? {
                Some(html) => self.ledger.put_chapter(&id, chapter_id, &html)?,
                None => missing.push(chapter_id.clone()),
            }
        }
        for href in &record.resource_hrefs {
            if let Some(data) = self.fetch_resource(&id, href).await? {
                self.ledger.put_resource(&id, href, &data)?;
            }
        }

        let total = record.chapter_ids.len();
        self.cache_book(&StoredBook { record, index, css })?;
        let mut status = SyncStatus::pending(&id);
        status.mark_synced(total - missing.len(), total, missing);
        self.ledger.put_sync_status(&status)?;
        info!(book_id = %id, chapters = total, "Imported book from remote");
        Ok(())
    }

    /// Write a remotely fetched book into the ledger. Its sync record says
    /// `synced` since the remote already has it.
    pub fn cache_book(&self, book: &StoredBook) -> Result<()> {
        self.ledger
            .put_book_data(&book.record, &book.index, &book.css)?;
        self.ledger
            .upsert_catalog(CatalogEntry::from_record(&book.record))?;
        if self.ledger.get_sync_status(&book.record.id)?.is_none() {
            let total = book.record.chapter_ids.len();
            let mut status = SyncStatus::pending(&book.record.id);
            status.mark_synced(total, total, Vec::new());
            self.ledger.put_sync_status(&status)?;
        }
        Ok(())
    }

    /// Record, index and stylesheet from the remote. `None` when the book
    /// data or index object is absent.
    pub async fn fetch_book(&self, book_id: &str) -> Result<Option<StoredBook>> {
        let Some(data) = self
            .remote
            .download_opt(&layout::book_data_key(book_id))
            .await?
        else {
            return Ok(None);
        };
        let Some(index) = self.remote.download_opt(&layout::index_key(book_id)).await? else {
            warn!(book_id, "Remote book data has no index document");
            return Ok(None);
        };
        let css = self
            .remote
            .download_opt(&layout::styles_key(book_id))
            .await?
            .map(text)
            .unwrap_or_default();

        Ok(Some(StoredBook {
            record: serde_json::from_slice(&data)?,
            index: text(index),
            css,
        }))
    }

    pub async fn fetch_chapter(&self, book_id: &str, chapter_id: &str) -> Result<Option<String>> {
        Ok(self
            .remote
            .download_opt(&layout::chapter_key(book_id, chapter_id))
            .await?
            .map(text))
    }

    pub async fn fetch_resource(&self, book_id: &str, path: &str) -> Result<Option<Bytes>> {
        Ok(self
            .remote
            .download_opt(&layout::resource_key(book_id, path))
            .await?)
    }

    /// Remove every remote object of the book. Returns the number deleted.
    pub async fn delete_remote(&self, book_id: &str) -> Result<usize> {
        Ok(self
            .remote
            .delete_prefix(&layout::book_prefix(book_id))
            .await?)
    }
}

fn text(bytes: Bytes) -> String {
    String::from_utf8_lossy(&bytes).into_owned()
}

/// `None` when `uploaded` of `total` chapters is enough to call the book
/// synced, otherwise the error to record.
pub(crate) fn threshold_error(uploaded: usize, total: usize, threshold: f64) -> Option<String> {
    if total == 0 {
        return None;
    }
    if uploaded == 0 {
        return Some(format!(
            "failed to upload any chapters (uploaded none of {total})"
        ));
    }
    let fraction = uploaded as f64 / total as f64;
    if fraction + f64::EPSILON < threshold {
        return Some(format!("partial upload: {uploaded} of {total} chapters"));
    }
    None
}
