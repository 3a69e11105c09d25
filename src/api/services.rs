use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};

use super::{
    models::{
        BookAcceptedResponse, BookResponse, HealthResponse, HistoryRequest,
        ProcessingStatusResponse, ResetResponse, StatsResponse,
    },
    state::AppState,
    utils,
};
use crate::api::error::ApiError;
use crate::pipeline::validate_book_id;

/// Book submission endpoint (POST /books)
///
/// Body is the raw EPUB archive. The book id comes from `X-Book-Id` or is
/// generated. Processing runs in the background; poll
/// `GET /books/{id}/status` for progress.
///
/// ## Responses:
/// - 202 with the book id once the id is claimed
/// - 409 when the same id is already being processed
/// - 413 when the body exceeds `server.max_archive_bytes`
pub async fn submit_book(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Body,
) -> Result<impl IntoResponse, ApiError> {
    utils::check_archive_content_type(&headers)?;
    let book_id = utils::book_id_from_headers(&headers)?;

    // Reject before buffering the archive.
    if state.orchestrator.is_locked(&book_id) {
        return Err(ApiError::Conflict(book_id));
    }

    let archive =
        utils::read_limited(body, state.config.server.max_archive_bytes.as_usize()).await?;
    if archive.is_empty() {
        return Err(ApiError::InvalidPayload("empty archive".into()));
    }

    state.orchestrator.submit(&book_id, archive)?;

    let response = BookAcceptedResponse {
        status_url: format!("/books/{book_id}/status"),
        book_id,
    };
    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// Catalog of stored books, newest first (GET /books)
pub async fn list_books(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.library.catalog()?))
}

/// Metadata, TOC, index document and stylesheet (GET /books/{id})
pub async fn get_book(
    State(state): State<AppState>,
    Path(book_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let book = state.library.get(&book_id).await?;
    Ok(Json(BookResponse::from(book)))
}

/// DELETE /books/{id}
pub async fn delete_book(
    State(state): State<AppState>,
    Path(book_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if state.orchestrator.is_locked(&book_id) {
        return Err(ApiError::Conflict(book_id));
    }
    if !state.library.delete_book(&book_id).await? {
        return Err(ApiError::NotFound(format!("book {book_id}")));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Processing state (GET /books/{id}/status)
pub async fn book_status(
    State(state): State<AppState>,
    Path(book_id): Path<String>,
) -> impl IntoResponse {
    Json(ProcessingStatusResponse::from(
        state.orchestrator.status(&book_id),
    ))
}

/// Clear a failed processing state (POST /books/{id}/reset)
pub async fn reset_book(
    State(state): State<AppState>,
    Path(book_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if state.orchestrator.is_locked(&book_id) {
        return Err(ApiError::Conflict(book_id));
    }
    let reset = state.orchestrator.reset_failed(&book_id);
    Ok(Json(ResetResponse { book_id, reset }))
}

/// Rendered chapter (GET /books/{id}/chapters/{chapter_id})
///
/// Always 200; the body is empty when the chapter exists nowhere.
pub async fn get_chapter(
    State(state): State<AppState>,
    Path((book_id, chapter_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let html = state.library.get_chapter(&book_id, &chapter_id).await?;
    Ok(([(header::CONTENT_TYPE, "text/html; charset=utf-8")], html))
}

/// Raw archive resource (GET /books/{id}/resources/{*path})
pub async fn get_resource(
    State(state): State<AppState>,
    Path((book_id, path)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let data = state
        .library
        .get_resource(&book_id, &path)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("resource {path} of book {book_id}")))?;
    Ok(([(header::CONTENT_TYPE, utils::resource_content_type(&path))], data))
}

/// Force a sync of one book (POST /books/{id}/sync)
pub async fn sync_book(
    State(state): State<AppState>,
    Path(book_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    validate_book_id(&book_id)?;
    let report = state.sync.force_sync(Some(book_id.as_str())).await?;
    Ok(Json(report))
}

/// Force a sync of every unsynced book (POST /sync)
pub async fn sync_all(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let report = state.sync.force_sync(None).await?;
    Ok(Json(report))
}

/// Sync record of one book (GET /books/{id}/sync)
pub async fn book_sync_status(
    State(state): State<AppState>,
    Path(book_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let status = state
        .library
        .sync_status(&book_id)?
        .ok_or_else(|| ApiError::NotFound(format!("sync status of book {book_id}")))?;
    Ok(Json(status))
}

/// GET /history
pub async fn list_history(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.library.history()?))
}

/// POST /history
pub async fn add_history(
    State(state): State<AppState>,
    Json(request): Json<HistoryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_book_id(&request.book_id)?;
    state.library.add_history(request.into())?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /history
pub async fn clear_history(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    state.library.clear_history()?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /history/{book_id}
pub async fn remove_history(
    State(state): State<AppState>,
    Path(book_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.library.remove_history(&book_id)? {
        return Err(ApiError::NotFound(format!("history entry for book {book_id}")));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Counters from the pipeline, the ledger and the process metrics (GET /stats)
pub async fn stats(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(StatsResponse {
        pipeline: state.orchestrator.stats(),
        store: state.library.stats()?,
        metrics: state.metrics.snapshot(),
    }))
}

/// Health check endpoint (GET /health)
///
/// The ledger must answer a catalog read. Remote reachability is reported
/// but never fails the check.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    use std::collections::HashMap;

    let mut components = HashMap::new();
    components.insert("api".to_string(), "healthy".to_string());

    let ledger = match state.library.catalog() {
        Ok(_) => "healthy".to_string(),
        Err(e) => {
            tracing::warn!(error = %e, "Ledger health check failed");
            "unhealthy".to_string()
        }
    };
    let all_healthy = ledger == "healthy";
    components.insert("ledger".to_string(), ledger);

    let remote = if state.sync.is_online().await {
        "online"
    } else {
        "offline"
    };
    components.insert("remote".to_string(), remote.to_string());

    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if all_healthy { "healthy" } else { "unhealthy" }.to_string(),
        components,
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    (status_code, Json(response))
}
