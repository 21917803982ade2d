use serde::{Deserialize, Serialize};

/// Identity an operation is attributed to in audit events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub id: String,
    pub username: String,
}

impl Actor {
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
        }
    }

    /// Actor for work the engine triggers itself (scheduled syncs, redeploys).
    pub fn system() -> Self {
        Self::new("system", "System")
    }

    pub fn is_system(&self) -> bool {
        self.id == "system"
    }
}
