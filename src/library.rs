//! The book library: the ledger as the source of truth for reads, with the
//! remote store as a read-through fallback and a sync kicked off after every
//! store.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::ledger::{LedgerError, LedgerStore, StoreStats};
use crate::models::{
    BookRecord, CatalogEntry, ProcessedBook, ReadingHistoryEntry, StoredBook, SyncStatus,
};
use crate::render::RenderedBook;
use crate::sync::SyncEngine;

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("Book not found: {0}")]
    NotFound(String),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

pub type Result<T> = std::result::Result<T, LibraryError>;

#[derive(Clone)]
pub struct Library {
    ledger: LedgerStore,
    sync: Arc<SyncEngine>,
}

impl Library {
    pub fn new(ledger: LedgerStore, sync: Arc<SyncEngine>) -> Self {
        Self { ledger, sync }
    }

    pub fn ledger(&self) -> &LedgerStore {
        &self.ledger
    }

    pub fn sync(&self) -> &Arc<SyncEngine> {
        &self.sync
    }

    /// Persist a processed book and queue it for sync.
    ///
    /// When the remote is reachable a background sync starts immediately;
    /// its outcome lands on the book's sync status, never here.
    pub async fn store(&self, book: &ProcessedBook, rendered: &RenderedBook) -> Result<BookRecord> {
        let record = BookRecord::from_book(book);
        self.ledger.store_book(&record, rendered, &book.resources)?;
        info!(
            book_id = %record.id,
            title = %record.metadata.title,
            chapters = record.chapter_ids.len(),
            "Book stored"
        );

        if self.sync.schedule(&record.id).await.is_none() {
            debug!(book_id = %record.id, "Book left pending for a later sync");
        }
        Ok(record)
    }

    /// Record, index document and stylesheet. Falls back to the remote on a
    /// local miss and caches what it finds.
    pub async fn get(&self, book_id: &str) -> Result<StoredBook> {
        if let Some(book) = self.get_local(book_id)? {
            return Ok(book);
        }
        if !self.sync.is_online().await {
            return Err(LibraryError::NotFound(book_id.to_string()));
        }

        match self.sync.fetch_book(book_id).await {
            Ok(Some(book)) => {
                if let Err(e) = self.sync.cache_book(&book) {
                    warn!(book_id, error = %e, "Failed to cache remote book");
                }
                debug!(book_id, "Book read through from remote");
                Ok(book)
            }
            Ok(None) => Err(LibraryError::NotFound(book_id.to_string())),
            Err(e) => {
                warn!(book_id, error = %e, "Remote lookup failed");
                Err(LibraryError::NotFound(book_id.to_string()))
            }
        }
    }

    fn get_local(&self, book_id: &str) -> Result<Option<StoredBook>> {
        let Some(record) = self.ledger.get_record(book_id)? else {
            return Ok(None);
        };
        let Some(index) = self.ledger.get_index(book_id)? else {
            return Ok(None);
        };
        let css = self.ledger.get_styles(book_id)?.unwrap_or_default();
        Ok(Some(StoredBook { record, index, css }))
    }

    /// Rendered chapter HTML, or an empty string when neither store has it.
    pub async fn get_chapter(&self, book_id: &str, chapter_id: &str) -> Result<String> {
        if let Some(html) = self.ledger.get_chapter(book_id, chapter_id)? {
            return Ok(html);
        }
        if !self.sync.is_online().await {
            return Ok(String::new());
        }

        match self.sync.fetch_chapter(book_id, chapter_id).await {
            Ok(Some(html)) => {
                if let Err(e) = self.ledger.put_chapter(book_id, chapter_id, &html) {
                    warn!(book_id, chapter_id, error = %e, "Failed to cache remote chapter");
                }
                Ok(html)
            }
            Ok(None) => Ok(String::new()),
            Err(e) => {
                warn!(book_id, chapter_id, error = %e, "Remote chapter lookup failed");
                Ok(String::new())
            }
        }
    }

    /// Raw archive resource by its archive path.
    pub async fn get_resource(&self, book_id: &str, path: &str) -> Result<Option<Vec<u8>>> {
        if let Some(data) = self.ledger.get_resource(book_id, path)? {
            return Ok(Some(data));
        }
        if !self.sync.is_online().await {
            return Ok(None);
        }

        match self.sync.fetch_resource(book_id, path).await {
            Ok(Some(data)) => {
                if let Err(e) = self.ledger.put_resource(book_id, path, &data) {
                    warn!(book_id, path, error = %e, "Failed to cache remote resource");
                }
                Ok(Some(data.to_vec()))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                warn!(book_id, path, error = %e, "Remote resource lookup failed");
                Ok(None)
            }
        }
    }

    /// Remove the book locally and, when online, from the remote. Returns
    /// whether it existed locally.
    pub async fn delete_book(&self, book_id: &str) -> Result<bool> {
        let existed = self.ledger.delete_book(book_id)?;

        if self.sync.is_online().await {
            match self.sync.delete_remote(book_id).await {
                Ok(deleted) => debug!(book_id, deleted, "Deleted remote copy"),
                Err(e) => warn!(book_id, error = %e, "Failed to delete remote copy"),
            }
        } else {
            debug!(book_id, "Offline, remote copy left in place");
        }

        info!(book_id, existed, "Book deleted");
        Ok(existed)
    }

    pub fn catalog(&self) -> Result<Vec<CatalogEntry>> {
        Ok(self.ledger.catalog()?)
    }

    pub fn sync_status(&self, book_id: &str) -> Result<Option<SyncStatus>> {
        Ok(self.ledger.get_sync_status(book_id)?)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        Ok(self.ledger.stats()?)
    }

    // Reading history

    pub fn add_history(&self, entry: ReadingHistoryEntry) -> Result<()> {
        Ok(self.ledger.add_history(entry)?)
    }

    pub fn history(&self) -> Result<Vec<ReadingHistoryEntry>> {
        Ok(self.ledger.history()?)
    }

    pub fn remove_history(&self, book_id: &str) -> Result<bool> {
        Ok(self.ledger.remove_history(book_id)?)
    }

    pub fn clear_history(&self) -> Result<()> {
        Ok(self.ledger.clear_history()?)
    }
}
