use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::models::{
    BookRecord, CatalogEntry, ReadingHistoryEntry, Resource, SyncState, SyncStatus,
};
use crate::render::RenderedBook;

use super::error::{LedgerError, Result};
use super::partitions::*;

/// Maximum number of reading-history entries kept.
pub const HISTORY_CAPACITY: usize = 50;

/// Fjall-backed local store for processed books, reading history and the
/// sync queue.
///
/// Each logical write goes through its own batch, so a reader never sees a
/// half-written chapter set; there is no locking across partitions.
#[derive(Clone)]
pub struct LedgerStore {
    keyspace: Keyspace,
    books: PartitionHandle,
    chapters: PartitionHandle,
    resources: PartitionHandle,
    catalog: PartitionHandle,
    history: PartitionHandle,
    sync_queue: PartitionHandle,
    /// Serializes read-modify-write of the single-key catalog and history lists.
    list_lock: Arc<Mutex<()>>,
}

impl LedgerStore {
    /// Open or create a Fjall store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Opening ledger");

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path).open()?;
        let open = |name: &str| keyspace.open_partition(name, PartitionCreateOptions::default());

        let books = open(PARTITION_BOOKS)?;
        let chapters = open(PARTITION_CHAPTERS)?;
        let resources = open(PARTITION_RESOURCES)?;
        let catalog = open(PARTITION_CATALOG)?;
        let history = open(PARTITION_HISTORY)?;
        let sync_queue = open(PARTITION_SYNC_QUEUE)?;

        Ok(Self {
            keyspace,
            books,
            chapters,
            resources,
            catalog,
            history,
            sync_queue,
            list_lock: Arc::new(Mutex::new(())),
        })
    }

    fn lock_lists(&self) -> MutexGuard<'_, ()> {
        self.list_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    // Books

    /// Write everything a processed book consists of and enqueue it for sync.
    ///
    /// Replaces an earlier version of the book: chapters and resources it no
    /// longer has are removed in the same batch.
    pub fn store_book(
        &self,
        record: &BookRecord,
        rendered: &RenderedBook,
        resources: &BTreeMap<String, Resource>,
    ) -> Result<()> {
        let id = record.id.as_str();
        let chapter_keys: HashMap<Vec<u8>, &str> = rendered
            .chapters
            .iter()
            .map(|c| (encode_chapter_key(id, &c.id), c.html.as_str()))
            .collect();
        let resource_keys: HashMap<Vec<u8>, &[u8]> = resources
            .values()
            .map(|r| (encode_resource_key(id, &r.href), r.data.as_slice()))
            .collect();

        let mut batch = self.keyspace.batch();
        batch.insert(&self.books, encode_book_key(id), serde_json::to_vec(record)?);
        batch.insert(&self.books, encode_index_key(id), rendered.index.as_bytes());
        batch.insert(&self.books, encode_styles_key(id), rendered.css.as_bytes());

        let mut stale = 0;
        for item in self.chapters.prefix(encode_chapter_prefix(id)) {
            let (key, _) = item?;
            if !chapter_keys.contains_key(&*key) {
                batch.remove(&self.chapters, key);
                stale += 1;
            }
        }
        for item in self.resources.prefix(encode_resource_prefix(id)) {
            let (key, _) = item?;
            if !resource_keys.contains_key(&*key) {
                batch.remove(&self.resources, key);
                stale += 1;
            }
        }
        for (key, html) in chapter_keys {
            batch.insert(&self.chapters, key, html.as_bytes());
        }
        for (key, data) in resource_keys {
            batch.insert(&self.resources, key, data);
        }
        batch.commit()?;

        self.upsert_catalog(CatalogEntry::from_record(record))?;
        self.put_sync_status(&SyncStatus::pending(id))?;
        debug!(
            book_id = id,
            chapters = rendered.chapters.len(),
            resources = resources.len(),
            stale,
            "Stored book"
        );
        Ok(())
    }

    /// Record, index document and stylesheet in one batch on `books`.
    pub fn put_book_data(&self, record: &BookRecord, index: &str, css: &str) -> Result<()> {
        let mut batch = self.keyspace.batch();
        batch.insert(&self.books, encode_book_key(&record.id), serde_json::to_vec(record)?);
        batch.insert(&self.books, encode_index_key(&record.id), index.as_bytes());
        batch.insert(&self.books, encode_styles_key(&record.id), css.as_bytes());
        batch.commit()?;
        Ok(())
    }

    pub fn put_chapter(&self, book_id: &str, chapter_id: &str, html: &str) -> Result<()> {
        self.chapters
            .insert(encode_chapter_key(book_id, chapter_id), html.as_bytes())?;
        Ok(())
    }

    pub fn put_resource(&self, book_id: &str, path: &str, data: &[u8]) -> Result<()> {
        self.resources.insert(encode_resource_key(book_id, path), data)?;
        Ok(())
    }

    pub fn get_record(&self, book_id: &str) -> Result<Option<BookRecord>> {
        self.get_json(&self.books, encode_book_key(book_id))
    }

    pub fn get_index(&self, book_id: &str) -> Result<Option<String>> {
        self.get_text(&self.books, encode_index_key(book_id))
    }

    pub fn get_styles(&self, book_id: &str) -> Result<Option<String>> {
        self.get_text(&self.books, encode_styles_key(book_id))
    }

    pub fn get_chapter(&self, book_id: &str, chapter_id: &str) -> Result<Option<String>> {
        self.get_text(&self.chapters, encode_chapter_key(book_id, chapter_id))
    }

    pub fn get_resource(&self, book_id: &str, path: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .resources
            .get(encode_resource_key(book_id, path))?
            .map(|v| v.to_vec()))
    }

    pub fn contains_book(&self, book_id: &str) -> Result<bool> {
        Ok(self.books.contains_key(encode_book_key(book_id))?)
    }

    /// Chapter ids stored for a book, in key order.
    pub fn chapter_ids(&self, book_id: &str) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for item in self.chapters.prefix(encode_chapter_prefix(book_id)) {
            let (key, _) = item?;
            let (_, chapter_id) = decode_chapter_key(&key)
                .ok_or_else(|| LedgerError::InvalidKey(String::from_utf8_lossy(&key).into()))?;
            ids.push(chapter_id);
        }
        Ok(ids)
    }

    /// Remove every local trace of a book. Returns whether a record existed.
    pub fn delete_book(&self, book_id: &str) -> Result<bool> {
        let existed = self.contains_book(book_id)?;

        let mut batch = self.keyspace.batch();
        batch.remove(&self.books, encode_book_key(book_id));
        batch.remove(&self.books, encode_index_key(book_id));
        batch.remove(&self.books, encode_styles_key(book_id));
        for item in self.chapters.prefix(encode_chapter_prefix(book_id)) {
            let (key, _) = item?;
            batch.remove(&self.chapters, key);
        }
        for item in self.resources.prefix(encode_resource_prefix(book_id)) {
            let (key, _) = item?;
            batch.remove(&self.resources, key);
        }
        batch.remove(&self.sync_queue, encode_sync_key(book_id));
        batch.commit()?;

        self.remove_catalog_entry(book_id)?;
        self.remove_history(book_id)?;

        debug!(book_id, existed, "Deleted book");
        Ok(existed)
    }

    // Catalog

    /// Newest first.
    pub fn catalog(&self) -> Result<Vec<CatalogEntry>> {
        Ok(self
            .get_json(&self.catalog, CATALOG_KEY)?
            .unwrap_or_default())
    }

    /// Replace any entry with the same id and put this one first.
    pub fn upsert_catalog(&self, entry: CatalogEntry) -> Result<()> {
        let _guard = self.lock_lists();
        let mut entries = self.catalog()?;
        entries.retain(|e| e.id != entry.id);
        entries.insert(0, entry);
        self.put_json(&self.catalog, CATALOG_KEY, &entries)
    }

    fn remove_catalog_entry(&self, book_id: &str) -> Result<()> {
        let _guard = self.lock_lists();
        let mut entries = self.catalog()?;
        let before = entries.len();
        entries.retain(|e| e.id != book_id);
        if entries.len() != before {
            self.put_json(&self.catalog, CATALOG_KEY, &entries)?;
        }
        Ok(())
    }

    // Reading history

    /// Newest first.
    pub fn history(&self) -> Result<Vec<ReadingHistoryEntry>> {
        Ok(self
            .get_json(&self.history, HISTORY_KEY)?
            .unwrap_or_default())
    }

    /// Add or replace the entry for `entry.book_id` at the front, dropping the
    /// oldest entries beyond [`HISTORY_CAPACITY`].
    pub fn add_history(&self, mut entry: ReadingHistoryEntry) -> Result<()> {
        entry.progress = entry.progress.clamp(0.0, 1.0);
        let _guard = self.lock_lists();
        let mut entries = self.history()?;
        entries.retain(|e| e.book_id != entry.book_id);
        entries.insert(0, entry);
        entries.truncate(HISTORY_CAPACITY);
        self.put_json(&self.history, HISTORY_KEY, &entries)
    }

    /// Returns whether an entry was removed.
    pub fn remove_history(&self, book_id: &str) -> Result<bool> {
        let _guard = self.lock_lists();
        let mut entries = self.history()?;
        let before = entries.len();
        entries.retain(|e| e.book_id != book_id);
        if entries.len() == before {
            return Ok(false);
        }
        self.put_json(&self.history, HISTORY_KEY, &entries)?;
        Ok(true)
    }

    pub fn clear_history(&self) -> Result<()> {
        let _guard = self.lock_lists();
        self.history.remove(HISTORY_KEY)?;
        Ok(())
    }

    // Sync queue

    pub fn get_sync_status(&self, book_id: &str) -> Result<Option<SyncStatus>> {
        self.get_json(&self.sync_queue, encode_sync_key(book_id))
    }

    pub fn put_sync_status(&self, status: &SyncStatus) -> Result<()> {
        self.put_json(&self.sync_queue, encode_sync_key(&status.book_id), status)
    }

    pub fn sync_statuses(&self) -> Result<Vec<SyncStatus>> {
        let mut statuses = Vec::new();
        for item in self.sync_queue.prefix("sync:") {
            let (_, value) = item?;
            statuses.push(serde_json::from_slice(&value)?);
        }
        Ok(statuses)
    }

    /// Ids of books whose record is in the given state.
    pub fn sync_ids_in(&self, state: SyncState) -> Result<Vec<String>> {
        Ok(self
            .sync_statuses()?
            .into_iter()
            .filter(|s| s.status == state)
            .map(|s| s.book_id)
            .collect())
    }

    /// Move every `error` record (and any `syncing` record left over from a
    /// previous process) back to `pending`, except the books in `active`.
    /// Returns the number reset.
    pub fn requeue_unsynced(&self, active: &HashSet<String>) -> Result<usize> {
        let mut reset = 0;
        for mut status in self.sync_statuses()? {
            if active.contains(&status.book_id) {
                continue;
            }
            if matches!(status.status, SyncState::Error | SyncState::Syncing) {
                status.reset_pending();
                self.put_sync_status(&status)?;
                reset += 1;
            }
        }
        Ok(reset)
    }

    /// Persist all pending writes to disk
    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }

    /// Get internal statistics (for debugging/monitoring)
    pub fn stats(&self) -> Result<StoreStats> {
        let mut stats = StoreStats::default();

        for item in self.books.prefix("book:") {
            item?;
            stats.book_count += 1;
        }
        for item in self.chapters.iter() {
            item?;
            stats.chapter_count += 1;
        }
        for item in self.resources.iter() {
            item?;
            stats.resource_count += 1;
        }
        for status in self.sync_statuses()? {
            if status.status == SyncState::Pending {
                stats.pending_sync += 1;
            }
        }
        stats.history_count = self.history()?.len();

        Ok(stats)
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        partition: &PartitionHandle,
        key: impl AsRef<[u8]>,
    ) -> Result<Option<T>> {
        match partition.get(key)? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    fn put_json<T: Serialize + ?Sized>(
        &self,
        partition: &PartitionHandle,
        key: impl AsRef<[u8]>,
        value: &T,
    ) -> Result<()> {
        partition.insert(key.as_ref(), serde_json::to_vec(value)?)?;
        Ok(())
    }

    fn get_text(&self, partition: &PartitionHandle, key: Vec<u8>) -> Result<Option<String>> {
        match partition.get(&key)? {
            Some(value) => String::from_utf8(value.to_vec())
                .map(Some)
                .map_err(|_| LedgerError::InvalidText(String::from_utf8_lossy(&key).into())),
            None => Ok(None),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub book_count: usize,
    pub chapter_count: usize,
    pub resource_count: usize,
    pub pending_sync: usize,
    pub history_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epub;
    use crate::fixtures::EpubFixture;
    use crate::models::ProcessedBook;
    use crate::render;
    use tempfile::TempDir;

    fn create_test_store() -> (LedgerStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = LedgerStore::open(temp_dir.path().join("test_ledger")).unwrap();
        (store, temp_dir)
    }

    fn sample_book(id: &str) -> ProcessedBook {
        epub::parse(id, &EpubFixture::sample().build()).unwrap()
    }

    fn store_sample(store: &LedgerStore, id: &str) -> (ProcessedBook, RenderedBook) {
        let book = sample_book(id);
        let rendered = render::render(&book);
        store
            .store_book(&BookRecord::from_book(&book), &rendered, &book.resources)
            .unwrap();
        (book, rendered)
    }

    fn history_entry(book_id: &str) -> ReadingHistoryEntry {
        ReadingHistoryEntry::builder()
            .book_id(book_id)
            .title("Title")
            .author("Author")
            .build()
    }

    #[test]
    fn test_open_store() {
        let temp_dir = TempDir::new().unwrap();
        let store = LedgerStore::open(temp_dir.path().join("test_ledger"));
        assert!(store.is_ok());
    }

    #[test]
    fn test_store_and_read_back() {
        let (store, _temp) = create_test_store();
        let (book, rendered) = store_sample(&store, "b1");

        let record = store.get_record("b1").unwrap().unwrap();
        assert_eq!(record.metadata, book.metadata);
        assert_eq!(record.chapter_ids, book.chapter_ids());
        assert_eq!(store.get_index("b1").unwrap().unwrap(), rendered.index);
        assert_eq!(store.get_styles("b1").unwrap().unwrap(), rendered.css);

        let first = &rendered.chapters[0];
        assert_eq!(store.get_chapter("b1", &first.id).unwrap().unwrap(), first.html);
        assert_eq!(store.get_chapter("b1", "nope").unwrap(), None);

        let image = store.get_resource("b1", "OEBPS/images/map.png").unwrap().unwrap();
        assert!(image.starts_with(b"\x89PNG"));

        let status = store.get_sync_status("b1").unwrap().unwrap();
        assert_eq!(status.status, SyncState::Pending);
    }

    #[test]
    fn test_restore_drops_previous_version() {
        let (store, _temp) = create_test_store();
        store_sample(&store, "bk");
        assert_eq!(store.chapter_ids("bk").unwrap().len(), 3);

        let smaller = epub::parse(
            "bk",
            &EpubFixture::new("Smaller").chapter("Only", "<p>new</p>").build(),
        )
        .unwrap();
        let rendered = render::render(&smaller);
        store
            .store_book(&BookRecord::from_book(&smaller), &rendered, &smaller.resources)
            .unwrap();

        assert_eq!(store.chapter_ids("bk").unwrap(), vec!["ch1".to_string()]);
        assert!(store.get_chapter("bk", "ch1").unwrap().unwrap().contains("new"));
        assert_eq!(store.get_chapter("bk", "ch3").unwrap(), None);
        assert!(store.get_resource("bk", "OEBPS/images/map.png").unwrap().is_none());
        assert_eq!(store.get_record("bk").unwrap().unwrap().chapter_ids, vec!["ch1"]);
    }

    #[test]
    fn test_catalog_newest_first_without_duplicates() {
        let (store, _temp) = create_test_store();
        store_sample(&store, "a");
        store_sample(&store, "b");
        store_sample(&store, "a");

        let ids: Vec<String> = store.catalog().unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(store.catalog().unwrap()[0].chapter_count, 3);
    }

    #[test]
    fn test_delete_book_is_scoped_to_prefix() {
        let (store, _temp) = create_test_store();
        store_sample(&store, "book");
        store_sample(&store, "book2");
        store.add_history(history_entry("book")).unwrap();

        assert!(store.delete_book("book").unwrap());
        assert!(store.get_record("book").unwrap().is_none());
        assert!(store.chapter_ids("book").unwrap().is_empty());
        assert!(store.get_resource("book", "OEBPS/images/map.png").unwrap().is_none());
        assert!(store.get_sync_status("book").unwrap().is_none());
        assert!(store.history().unwrap().is_empty());

        assert_eq!(store.chapter_ids("book2").unwrap().len(), 3);
        let ids: Vec<String> = store.catalog().unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["book2"]);

        assert!(!store.delete_book("book").unwrap());
    }

    #[test]
    fn test_history_replace_and_cap() {
        let (store, _temp) = create_test_store();
        for i in 0..(HISTORY_CAPACITY + 5) {
            store.add_history(history_entry(&format!("b{i}"))).unwrap();
        }
        let history = store.history().unwrap();
        assert_eq!(history.len(), HISTORY_CAPACITY);
        assert_eq!(history[0].book_id, format!("b{}", HISTORY_CAPACITY + 4));

        store.add_history(history_entry("b10")).unwrap();
        let history = store.history().unwrap();
        assert_eq!(history.len(), HISTORY_CAPACITY);
        assert_eq!(history[0].book_id, "b10");
        assert_eq!(history.iter().filter(|e| e.book_id == "b10").count(), 1);

        assert!(store.remove_history("b10").unwrap());
        assert!(!store.remove_history("b10").unwrap());

        store.clear_history().unwrap();
        assert!(store.history().unwrap().is_empty());
    }

    #[test]
    fn test_history_progress_clamped() {
        let (store, _temp) = create_test_store();
        let mut entry = history_entry("b");
        entry.progress = 1.7;
        store.add_history(entry).unwrap();
        assert_eq!(store.history().unwrap()[0].progress, 1.0);
    }

    #[test]
    fn test_requeue_unsynced() {
        let (store, _temp) = create_test_store();
        let mut failed = SyncStatus::pending("x");
        failed.mark_error("boom");
        store.put_sync_status(&failed).unwrap();
        let mut done = SyncStatus::pending("y");
        done.mark_synced(1, 1, Vec::new());
        store.put_sync_status(&done).unwrap();

        assert_eq!(store.requeue_unsynced(&HashSet::new()).unwrap(), 1);
        assert_eq!(store.sync_ids_in(SyncState::Pending).unwrap(), vec!["x"]);
        assert_eq!(store.sync_ids_in(SyncState::Synced).unwrap(), vec!["y"]);
    }

    #[test]
    fn test_requeue_skips_active_books() {
        let (store, _temp) = create_test_store();
        let mut running = SyncStatus::pending("running");
        running.mark_syncing();
        store.put_sync_status(&running).unwrap();
        let mut stale = SyncStatus::pending("stale");
        stale.mark_syncing();
        store.put_sync_status(&stale).unwrap();

        let active = HashSet::from(["running".to_string()]);
        assert_eq!(store.requeue_unsynced(&active).unwrap(), 1);
        assert_eq!(store.sync_ids_in(SyncState::Syncing).unwrap(), vec!["running"]);
        assert_eq!(store.sync_ids_in(SyncState::Pending).unwrap(), vec!["stale"]);
    }

    #[test]
    fn test_stats() {
        let (store, _temp) = create_test_store();
        store_sample(&store, "b1");

        let stats = store.stats().unwrap();
        assert_eq!(stats.book_count, 1);
        assert_eq!(stats.chapter_count, 3);
        assert_eq!(stats.resource_count, 2);
        assert_eq!(stats.pending_sync, 1);
        store.persist().unwrap();
    }
}
