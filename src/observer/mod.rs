//! Best-effort workflow observers.
//!
//! The bus reports every send and every workflow status change to an
//! [`ObserverSet`]. Observer failures are logged and never reach the workflow.

mod webhook;

pub use webhook::{WebhookConfig, WebhookObserver};

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::agent::{AgentStatus, Message, MessageType};
use crate::error::ObserverError;

/// Workflow lifecycle status reported to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Running,
    Completed,
    Failed,
}

impl WorkflowStatus {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Running => "running",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Event delivered to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObserverEvent {
    /// A message is about to be delivered.
    AgentMessage {
        from_agent: String,
        to_agent: String,
        content: String,
        message_type: MessageType,
        timestamp: DateTime<Utc>,
    },
    /// Workflow status with every agent's current status.
    WorkflowStatus {
        workflow_id: String,
        status: WorkflowStatus,
        agents: BTreeMap<String, AgentStatus>,
    },
}

impl ObserverEvent {
    pub fn agent_message(message: &Message) -> Self {
        ObserverEvent::AgentMessage {
            from_agent: message.from_agent().to_string(),
            to_agent: message.to_agent().to_string(),
            content: message.content().to_string(),
            message_type: message.message_type(),
            timestamp: message.timestamp(),
        }
    }

    /// Event kind, as serialized in the `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            ObserverEvent::AgentMessage { .. } => "agent_message",
            ObserverEvent::WorkflowStatus { .. } => "workflow_status",
        }
    }
}

/// Receives workflow events.
#[async_trait]
pub trait Observer: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(&self, event: &ObserverEvent) -> Result<(), ObserverError>;

    /// Wait for deliveries still running in the background.
    async fn flush(&self) {}
}

/// Logs every event at debug level under the `observer::audit` target.
#[derive(Debug, Default)]
pub struct LogObserver;

#[async_trait]
impl Observer for LogObserver {
    fn name(&self) -> &str {
        "builtin.audit_log"
    }

    async fn notify(&self, event: &ObserverEvent) -> Result<(), ObserverError> {
        match event {
            ObserverEvent::AgentMessage {
                from_agent,
                to_agent,
                message_type,
                ..
            } => tracing::debug!(
                target: "observer::audit",
                observer = self.name(),
                from = %from_agent,
                to = %to_agent,
                message_type = %message_type,
                "Agent message"
            ),
            ObserverEvent::WorkflowStatus {
                workflow_id,
                status,
                agents,
            } => tracing::debug!(
                target: "observer::audit",
                observer = self.name(),
                workflow_id = %workflow_id,
                status = %status,
                agents = agents.len(),
                "Workflow status"
            ),
        }
        Ok(())
    }
}

/// Fans events out to in-process subscribers.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    sender: broadcast::Sender<ObserverEvent>,
}

impl ChannelObserver {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ObserverEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl Observer for ChannelObserver {
    fn name(&self) -> &str {
        "builtin.channel"
    }

    async fn notify(&self, event: &ObserverEvent) -> Result<(), ObserverError> {
        // No subscribers is not a failure.
        let _ = self.sender.send(event.clone());
        Ok(())
    }
}

/// A group of observers notified in registration order.
#[derive(Clone, Default)]
pub struct ObserverSet {
    observers: Vec<Arc<dyn Observer>>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn push(&mut self, observer: Arc<dyn Observer>) {
        self.observers.push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Notify every observer. Failures are logged and otherwise ignored.
    pub async fn notify(&self, event: &ObserverEvent) {
        for observer in &self.observers {
            if let Err(err) = observer.notify(event).await {
                tracing::warn!(
                    observer = observer.name(),
                    event = event.kind(),
                    error = %err,
                    "Observer notification failed"
                );
            }
        }
    }

    /// Flush every observer, in registration order.
    pub async fn flush(&self) {
        for observer in &self.observers {
            observer.flush().await;
        }
    }
}
