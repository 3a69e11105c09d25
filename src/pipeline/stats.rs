use serde::Serialize;

use super::orchestrator::{ProcessingState, ProcessingStatus};

/// Aggregate view over every status the orchestrator has recorded.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineStats {
    pub completed: usize,
    pub failed: usize,
    pub in_flight: usize,
    /// Mean wall-clock time of completed runs, `None` before the first one.
    pub mean_duration_ms: Option<f64>,
}

impl PipelineStats {
    pub fn collect<'a>(statuses: impl IntoIterator<Item = &'a ProcessingStatus>) -> Self {
        let mut stats = Self::default();
        let mut total_ms = 0i64;

        for status in statuses {
            match status.state {
                ProcessingState::Processed => {
                    stats.completed += 1;
                    if let Some(duration) = status.duration() {
                        total_ms += duration.num_milliseconds();
                    }
                }
                ProcessingState::Failed => stats.failed += 1,
                ProcessingState::Processing => stats.in_flight += 1,
                ProcessingState::NotStarted => {}
            }
        }

        if stats.completed > 0 {
            stats.mean_duration_ms = Some(total_ms as f64 / stats.completed as f64);
        }
        stats
    }
}
