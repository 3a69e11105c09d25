//! Book processing: archive bytes in, stored book out.
//!
//! The [`Orchestrator`] owns the per-book state machine
//! (`not_started -> processing -> processed | failed`) and the lock that
//! keeps a book id from being processed twice at once. Construct one per
//! process and share it behind an `Arc`.

pub mod batch;
pub mod orchestrator;
pub mod stats;

pub use batch::{BatchFailure, BatchItem, BatchReport};
pub use orchestrator::{Orchestrator, ProcessingState, ProcessingStatus};
pub use stats::PipelineStats;

use thiserror::Error;
use uuid::Uuid;

use crate::epub::EpubError;
use crate::library::LibraryError;

/// Longest accepted book id.
pub const MAX_BOOK_ID_LEN: usize = 128;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Book {0} is already being processed")]
    Concurrency(String),

    #[error("Invalid book id: {0:?}")]
    InvalidBookId(String),

    #[error(transparent)]
    Epub(#[from] EpubError),

    #[error(transparent)]
    Library(#[from] LibraryError),

    #[error("Processing task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Ids are used verbatim in ledger keys and remote object paths, so they are
/// limited to `[A-Za-z0-9._-]{1,128}` and may not be all dots.
pub fn validate_book_id(book_id: &str) -> Result<()> {
    let valid = !book_id.is_empty()
        && book_id.len() <= MAX_BOOK_ID_LEN
        && book_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        && !book_id.chars().all(|c| c == '.');
    if valid {
        Ok(())
    } else {
        Err(PipelineError::InvalidBookId(book_id.to_string()))
    }
}

/// Time-ordered id for books submitted without one.
pub fn new_book_id() -> String {
    Uuid::now_v7().to_string()
}
