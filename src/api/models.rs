//! Request and response bodies for the HTTP API.
//!
//! Books are submitted as raw archive bytes (`POST /books`); everything else
//! speaks JSON except chapters and resources, which are served as-is.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::ledger::StoreStats;
use crate::models::{BookMetadata, ReadingHistoryEntry, StoredBook, TocTree};
use crate::observability::MetricsSnapshot;
use crate::pipeline::{PipelineStats, ProcessingState, ProcessingStatus};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BookAcceptedResponse {
    pub book_id: String,
    pub status_url: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProcessingStatusResponse {
    pub book_id: String,
    pub state: ProcessingState,
    pub processed: bool,
    pub processing: bool,
    pub progress: u8,
    pub error: Option<String>,
}

impl From<ProcessingStatus> for ProcessingStatusResponse {
    fn from(status: ProcessingStatus) -> Self {
        Self {
            processed: status.is_processed(),
            processing: status.is_processing(),
            book_id: status.book_id,
            state: status.state,
            progress: status.progress,
            error: status.error,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BookResponse {
    pub id: String,
    pub metadata: BookMetadata,
    pub chapter_ids: Vec<String>,
    pub toc: TocTree,
    pub index: String,
    pub stylesheet: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
}

impl From<StoredBook> for BookResponse {
    fn from(book: StoredBook) -> Self {
        Self {
            id: book.record.id,
            metadata: book.record.metadata,
            chapter_ids: book.record.chapter_ids,
            toc: book.record.toc,
            index: book.index,
            stylesheet: book.css,
            created_at: book.record.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ResetResponse {
    pub book_id: String,
    pub reset: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HistoryRequest {
    pub book_id: String,
    pub title: String,
    pub author: String,
    #[serde(default)]
    pub progress: f32,
    #[serde(default)]
    pub chapter_id: Option<String>,
}

impl From<HistoryRequest> for ReadingHistoryEntry {
    fn from(request: HistoryRequest) -> Self {
        ReadingHistoryEntry::builder()
            .book_id(request.book_id)
            .title(request.title)
            .author(request.author)
            .progress(request.progress)
            .maybe_chapter_id(request.chapter_id)
            .build()
    }
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub pipeline: PipelineStats,
    pub store: StoreStats,
    pub metrics: MetricsSnapshot,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: HashMap<String, String>,
    pub version: String,
}
