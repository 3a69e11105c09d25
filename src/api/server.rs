use std::net::SocketAddr;

use axum::{
    Router,
    routing::{delete, get, post},
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::{services, state::AppState};

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Every route of the HTTP API.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/books", post(services::submit_book).get(services::list_books))
        .route(
            "/books/{book_id}",
            get(services::get_book).delete(services::delete_book),
        )
        .route("/books/{book_id}/status", get(services::book_status))
        .route("/books/{book_id}/reset", post(services::reset_book))
        .route(
            "/books/{book_id}/chapters/{chapter_id}",
            get(services::get_chapter),
        )
        .route("/books/{book_id}/resources/{*path}", get(services::get_resource))
        .route(
            "/books/{book_id}/sync",
            get(services::book_sync_status).post(services::sync_book),
        )
        .route("/sync", post(services::sync_all))
        .route(
            "/history",
            get(services::list_history)
                .post(services::add_history)
                .delete(services::clear_history),
        )
        .route("/history/{book_id}", delete(services::remove_history))
        .route("/stats", get(services::stats))
        .route("/health", get(services::health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Serve the API until Ctrl+C or SIGTERM, starting the background sync
/// tasks first.
pub async fn run(address: SocketAddr, state: AppState) -> Result<(), AnyError> {
    let background = state.sync.start();
    let app = router(state);

    let listener = TcpListener::bind(address).await?;
    info!(%address, "epubvault API listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    for task in background {
        task.abort();
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate())
            .expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
