//! Audit events for project and GitOps activity.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::model::Actor;
use crate::tasks::{spawn_detached, DEFAULT_DETACHED_TIMEOUT};

pub const PROJECT_CREATE: &str = "project.create";
pub const PROJECT_DEPLOY: &str = "project.deploy";
pub const PROJECT_DEPLOY_FAILED: &str = "project.deploy.failed";
pub const PROJECT_STOP: &str = "project.stop";
pub const PROJECT_RESTART: &str = "project.restart";
pub const PROJECT_UPDATE: &str = "project.update";
pub const PROJECT_DESTROY: &str = "project.destroy";
pub const GITOPS_SYNC: &str = "gitops.sync";
pub const GITOPS_SYNC_FAILED: &str = "gitops.sync.failed";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub resource_id: String,
    pub resource_name: String,
    pub actor: Actor,
    pub metadata: BTreeMap<String, String>,
}

impl ProjectEvent {
    pub fn new(event_type: &str, resource_id: &str, resource_name: &str, actor: &Actor) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            resource_id: resource_id.to_string(),
            resource_name: resource_name.to_string(),
            actor: actor.clone(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Destination for audit events.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn record(&self, event: ProjectEvent) -> Result<(), String>;
}

/// Dispatches `event` without blocking the caller; failures are only logged.
pub fn emit(sink: &Arc<dyn EventSink>, event: ProjectEvent) {
    let sink = Arc::clone(sink);
    spawn_detached("audit-event", DEFAULT_DETACHED_TIMEOUT, async move {
        let event_type = event.event_type.clone();
        if let Err(e) = sink.record(event).await {
            log::warn!("Failed to record audit event {}: {}", event_type, e);
        }
    });
}

/// Writes events to the log.
#[derive(Debug, Default, Clone)]
pub struct LogEventSink;

#[async_trait]
impl EventSink for LogEventSink {
    async fn record(&self, event: ProjectEvent) -> Result<(), String> {
        log::info!(
            "audit: {} {} ({}) by {} {:?}",
            event.event_type,
            event.resource_name,
            event.resource_id,
            event.actor.username,
            event.metadata
        );
        Ok(())
    }
}

/// Fans events out to in-process subscribers.
#[derive(Clone)]
pub struct BroadcastEventSink {
    sender: broadcast::Sender<ProjectEvent>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProjectEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastEventSink {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl EventSink for BroadcastEventSink {
    async fn record(&self, event: ProjectEvent) -> Result<(), String> {
        // No active receivers is fine
        let _ = self.sender.send(event);
        Ok(())
    }
}
