use futures_util::stream::{self, StreamExt};
use serde::Serialize;

use super::ProjectOrchestrator;

/// Maximum number of container operations in flight.
pub const BULK_CONCURRENCY: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerAction {
    Start,
    Stop,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFailure {
    pub id: String,
    pub error: String,
}

/// Per-item outcome of a bulk operation.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<BatchFailure>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

impl ProjectOrchestrator {
    /// Starts or stops containers with bounded concurrency. One failing
    /// container does not affect the others.
    pub async fn bulk_container_action(
        &self,
        container_ids: Vec<String>,
        action: ContainerAction,
    ) -> BatchReport {
        let results: Vec<(String, Result<(), String>)> = stream::iter(container_ids)
            .map(|id| async move {
                let result = match action {
                    ContainerAction::Start => self.containers.start_container(&id).await,
                    ContainerAction::Stop => self.containers.stop_container(&id).await,
                };
                (id, result.map_err(|e| e.to_string()))
            })
            .buffer_unordered(BULK_CONCURRENCY)
            .collect()
            .await;

        let mut report = BatchReport::default();
        for (id, result) in results {
            match result {
                Ok(()) => report.succeeded.push(id),
                Err(error) => {
                    log::warn!("{:?} of container {} failed: {}", action, id, error);
                    report.failed.push(BatchFailure { id, error });
                }
            }
        }
        report
    }
}
