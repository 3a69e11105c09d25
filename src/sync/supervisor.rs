//! Detached background tasks whose failures end up in the log instead of
//! disappearing with the dropped `JoinHandle`.

use std::fmt::Display;
use std::future::Future;

use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Spawn `fut` on the runtime. An `Err` result is logged at `warn`, a panic
/// at `error`; neither reaches the caller.
pub fn spawn_supervised<F, E>(name: &'static str, fut: F) -> JoinHandle<()>
where
    F: Future<Output = Result<(), E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let task = tokio::spawn(fut);
    tokio::spawn(async move {
        match task.await {
            Ok(Ok(())) => debug!(task = name, "Background task finished"),
            Ok(Err(e)) => warn!(task = name, error = %e, "Background task failed"),
            Err(join_err) if join_err.is_panic() => {
                error!(task = name, "Background task panicked")
            }
            Err(join_err) => debug!(task = name, error = %join_err, "Background task cancelled"),
        }
    })
}
