//! Replication of processed books to remote object storage.
//!
//! The [`SyncEngine`] drains the ledger's sync queue: every `pending` book is
//! uploaded under `books/<id>/` (see [`crate::storage::layout`]) and its
//! [`SyncStatus`](crate::models::SyncStatus) moved to `synced` or `error`.
//! Upload failures never propagate to whoever stored the book; they are
//! recorded on the status and logged.

pub mod connectivity;
pub mod engine;
pub mod supervisor;

pub use connectivity::{AlwaysOnline, Connectivity, HttpProbe, ManualConnectivity};
pub use engine::{SyncEngine, SyncReport};
pub use supervisor::spawn_supervised;

use thiserror::Error;

use crate::ledger::LedgerError;
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Remote storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Book not found locally: {0}")]
    BookNotFound(String),

    #[error("Chapter {chapter_id} of {book_id} is missing locally")]
    ChapterNotFound { book_id: String, chapter_id: String },

    #[error("Remote storage is unreachable")]
    Offline,
}

pub type Result<T> = std::result::Result<T, SyncError>;
