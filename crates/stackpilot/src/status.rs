//! Pure status computations: live status derivation, compose project name
//! normalization and lifecycle transitions.

use crate::model::{ProjectStatus, RuntimeService};

/// Derives a project status from its service list.
///
/// Empty → `Unknown`; all running → `Running`; some running →
/// `PartiallyRunning`; none running → `Stopped`.
pub fn calculate_project_status(services: &[RuntimeService]) -> ProjectStatus {
    if services.is_empty() {
        return ProjectStatus::Unknown;
    }

    let running = services.iter().filter(|s| s.is_running()).count();
    if running == services.len() {
        ProjectStatus::Running
    } else if running > 0 {
        ProjectStatus::PartiallyRunning
    } else {
        ProjectStatus::Stopped
    }
}

/// Status from container counts gathered by the batched reconciliation query.
pub fn status_from_counts(
    containers_found: usize,
    running_count: u32,
    service_count: u32,
) -> ProjectStatus {
    if containers_found == 0 {
        return ProjectStatus::Stopped;
    }
    if service_count > 0 && running_count >= service_count {
        ProjectStatus::Running
    } else if running_count > 0 {
        ProjectStatus::PartiallyRunning
    } else {
        ProjectStatus::Stopped
    }
}

/// Normalizes a name the way docker compose does for `-p`.
///
/// Lowercases, drops everything outside `[a-z0-9_-]` and trims leading
/// `_`/`-`. Idempotent.
pub fn normalize_compose_project_name(name: &str) -> String {
    let kept: String = name
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_' || *c == '-')
        .collect();
    kept.trim_start_matches(['_', '-']).to_string()
}

/// A status-changing lifecycle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusOp {
    Deploy,
    Down,
    Restart,
}

impl StatusOp {
    /// Status persisted while the external call is in flight.
    pub fn transitional(&self) -> ProjectStatus {
        match self {
            StatusOp::Deploy => ProjectStatus::Deploying,
            StatusOp::Down => ProjectStatus::Stopping,
            StatusOp::Restart => ProjectStatus::Restarting,
        }
    }
}

/// How the external call of a lifecycle operation resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpOutcome {
    /// The call succeeded; carries the freshly reconciled live status.
    Succeeded(ProjectStatus),
    Failed,
}

/// Status to persist once a lifecycle operation has resolved.
pub fn next_status(op: StatusOp, outcome: OpOutcome) -> ProjectStatus {
    match (op, outcome) {
        (StatusOp::Deploy, OpOutcome::Failed) => ProjectStatus::Stopped,
        (StatusOp::Down, OpOutcome::Failed) => ProjectStatus::Running,
        (StatusOp::Restart, OpOutcome::Failed) => ProjectStatus::Running,
        (StatusOp::Down, OpOutcome::Succeeded(ProjectStatus::Unknown)) => ProjectStatus::Stopped,
        (_, OpOutcome::Succeeded(ProjectStatus::Unknown)) => ProjectStatus::Running,
        (_, OpOutcome::Succeeded(live)) => live,
    }
}
