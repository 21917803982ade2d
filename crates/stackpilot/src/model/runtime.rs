//! Ephemeral views of live container state.

use serde::{Deserialize, Serialize};

/// A container carrying compose labels, as returned by the global listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposeContainer {
    pub id: String,
    pub name: String,
    /// Value of the `com.docker.compose.project` label.
    pub project: String,
    /// Value of the `com.docker.compose.service` label.
    pub service: String,
    pub image: String,
    /// Docker state: `running`, `exited`, `created`, ...
    pub state: String,
    /// Human readable status, e.g. `Up 3 minutes (healthy)`.
    pub status: String,
    pub health: Option<String>,
    #[serde(default)]
    pub ports: Vec<PortMapping>,
}

impl ComposeContainer {
    pub fn is_running(&self) -> bool {
        is_running_state(&self.state)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    pub host_ip: Option<String>,
    pub host_port: Option<u16>,
    pub container_port: u16,
    pub protocol: String,
}

/// One compose service of a project, live or declared-but-absent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeService {
    pub name: String,
    pub image: String,
    pub status: String,
    pub container_id: Option<String>,
    pub container_name: Option<String>,
    pub ports: Vec<PortMapping>,
    pub health: Option<String>,
    /// Declared compose definition of the service, when known.
    pub service_config: Option<serde_json::Value>,
}

impl RuntimeService {
    pub fn is_running(&self) -> bool {
        is_running_state(&self.status)
    }
}

/// `running` from the engine API, `Up ...` from the CLI status column.
pub(crate) fn is_running_state(state: &str) -> bool {
    let state = state.trim().to_ascii_lowercase();
    state == "running" || state == "up" || state.starts_with("up ")
}
