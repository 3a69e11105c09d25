/// Fjall-based local persistence for processed books
///
/// Everything the reader needs offline lives here, keyed by book id:
///
/// - Book records (metadata, chapter ids, TOC), index documents and stylesheets
/// - Rendered chapter HTML
/// - Raw resources (images, fonts, css) extracted from the archive
/// - The catalog of processed books and the capped reading history
/// - The sync queue: one `SyncStatus` per book awaiting or past replication
///
/// ## Usage
///
/// ```rust,ignore
/// use epubvault::ledger::LedgerStore;
///
/// let store = LedgerStore::open("data/ledger")?;
/// store.store_book(&record, &rendered, &book.resources)?;
/// let html = store.get_chapter("book-1", "ch1")?;
/// ```
pub mod error;
pub mod partitions;
pub mod store;

pub use error::{LedgerError, Result};
pub use store::{HISTORY_CAPACITY, LedgerStore, StoreStats};
