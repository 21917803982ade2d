//! Domain types shared by the engine components.

pub mod actor;
pub mod gitops;
pub mod project;
pub mod runtime;

pub use actor::Actor;
pub use gitops::{GitAuthType, GitOpsSync, GitRepository, SyncStatus};
pub use project::{Project, ProjectStatus, ProjectSummary};
pub use runtime::{ComposeContainer, PortMapping, RuntimeService};
