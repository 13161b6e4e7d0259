//! Agent trait, shared state, and message dispatch.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};

use crate::agent::memory::AgentMemory;
use crate::agent::message::{Message, MessageType, Metadata};
use crate::error::AgentError;
use crate::llm::TextGenerator;

/// Lifecycle status of an agent.
///
/// There is no terminal state: any agent can receive another message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Working,
    Waiting,
    Completed,
    Error,
}

impl AgentStatus {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Working => "working",
            AgentStatus::Waiting => "waiting",
            AgentStatus::Completed => "completed",
            AgentStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Role an agent plays in a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleType {
    Coordinator,
    Coder,
    Tester,
    Runner,
}

impl RoleType {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleType::Coordinator => "coordinator",
            RoleType::Coder => "coder",
            RoleType::Tester => "tester",
            RoleType::Runner => "runner",
        }
    }
}

impl std::fmt::Display for RoleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// State every agent carries, whatever its role.
pub struct AgentCore {
    agent_id: String,
    /// Registry tag the agent was built from.
    role_tag: String,
    /// Free-text description from the descriptor.
    description: String,
    model: String,
    pub status: AgentStatus,
    pub memory: AgentMemory,
    generator: Arc<dyn TextGenerator>,
}

impl AgentCore {
    pub fn new(
        agent_id: impl Into<String>,
        role_tag: impl Into<String>,
        description: impl Into<String>,
        model: impl Into<String>,
        generator: Arc<dyn TextGenerator>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            role_tag: role_tag.into(),
            description: description.into(),
            model: model.into(),
            status: AgentStatus::Idle,
            memory: AgentMemory::new(),
            generator,
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn role_tag(&self) -> &str {
        &self.role_tag
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Prompt line stating the descriptor's role description, if it has one.
    pub fn role_preamble(&self) -> String {
        let description = self.description.trim();
        if description.is_empty() {
            String::new()
        } else {
            format!("Your role: {description}\n\n")
        }
    }

    pub fn generator(&self) -> &Arc<dyn TextGenerator> {
        &self.generator
    }

    /// Build a message from this agent.
    pub fn message(
        &self,
        to_agent: &str,
        message_type: MessageType,
        content: impl Into<String>,
    ) -> Result<Message, AgentError> {
        Ok(Message::new(&self.agent_id, to_agent, message_type, content)?)
    }

    /// Build a message from this agent with metadata.
    pub fn message_with(
        &self,
        to_agent: &str,
        message_type: MessageType,
        content: impl Into<String>,
        metadata: Metadata,
    ) -> Result<Message, AgentError> {
        Ok(self
            .message(to_agent, message_type, content)?
            .with_metadata(metadata))
    }

    /// Build an ERROR message. Never fails.
    pub fn error_message(&self, to_agent: &str, error: &str) -> Message {
        Message::error_reply(&self.agent_id, to_agent, error)
    }
}

/// A role in the workflow.
///
/// Roles implement [`Agent::handle_task`] and may override any other handler.
/// Callers drive agents only through [`Agent::process_message`].
#[async_trait]
pub trait Agent: Send + Sync {
    fn core(&self) -> &AgentCore;

    fn core_mut(&mut self) -> &mut AgentCore;

    fn role(&self) -> RoleType;

    fn agent_id(&self) -> &str {
        self.core().agent_id()
    }

    fn status(&self) -> AgentStatus {
        self.core().status
    }

    fn memory(&self) -> &AgentMemory {
        &self.core().memory
    }

    async fn handle_task(&mut self, message: &Message) -> Result<Vec<Message>, AgentError>;

    async fn handle_data(&mut self, message: &Message) -> Result<Vec<Message>, AgentError> {
        let reply = self.core().message(
            message.from_agent(),
            MessageType::Response,
            format!("Received data: {}", message.content()),
        )?;
        Ok(vec![reply])
    }

    async fn handle_request(&mut self, message: &Message) -> Result<Vec<Message>, AgentError> {
        let reply = self.core().message(
            message.from_agent(),
            MessageType::Response,
            format!("Handled request: {}", message.content()),
        )?;
        Ok(vec![reply])
    }

    async fn handle_response(&mut self, _message: &Message) -> Result<Vec<Message>, AgentError> {
        Ok(Vec::new())
    }

    async fn handle_error(&mut self, message: &Message) -> Result<Vec<Message>, AgentError> {
        tracing::warn!(
            agent = %self.agent_id(),
            from = %message.from_agent(),
            error = %message.content(),
            "Agent received error"
        );
        Ok(Vec::new())
    }

    async fn handle_status(&mut self, message: &Message) -> Result<Vec<Message>, AgentError> {
        let reply = self.core().message(
            message.from_agent(),
            MessageType::Status,
            format!("Status: {}", self.status()),
        )?;
        Ok(vec![reply])
    }

    /// REVIEW has no default behavior; the sender is told so.
    async fn handle_review(&mut self, message: &Message) -> Result<Vec<Message>, AgentError> {
        let text = format!("Unknown message type: {}", message.message_type());
        Ok(vec![self.core().error_message(message.from_agent(), &text)])
    }

    /// Handle one message and return the replies.
    ///
    /// Never fails. Handler errors and panics become a single ERROR reply to
    /// the sender and leave the agent in [`AgentStatus::Error`].
    async fn process_message(&mut self, message: Message) -> Vec<Message> {
        self.core_mut().status = AgentStatus::Working;
        self.core_mut().memory.add_message(message.clone());

        tracing::debug!(
            agent = %self.agent_id(),
            from = %message.from_agent(),
            message_type = %message.message_type(),
            "Dispatching message"
        );

        let dispatched = AssertUnwindSafe(async {
            match message.message_type() {
                MessageType::Task => self.handle_task(&message).await,
                MessageType::Data => self.handle_data(&message).await,
                MessageType::Request => self.handle_request(&message).await,
                MessageType::Response => self.handle_response(&message).await,
                MessageType::Error => self.handle_error(&message).await,
                MessageType::Status => self.handle_status(&message).await,
                MessageType::Review => self.handle_review(&message).await,
            }
        })
        .catch_unwind()
        .await;

        match dispatched {
            Ok(Ok(replies)) => {
                self.core_mut().status = AgentStatus::Idle;
                replies
            }
            Ok(Err(err)) => {
                tracing::warn!(agent = %self.agent_id(), error = %err, "Handler failed");
                self.core_mut().status = AgentStatus::Error;
                vec![self.core().error_message(message.from_agent(), &err.to_string())]
            }
            Err(panic) => {
                let text = panic_text(panic.as_ref());
                tracing::error!(agent = %self.agent_id(), error = %text, "Handler panicked");
                self.core_mut().status = AgentStatus::Error;
                vec![self.core().error_message(message.from_agent(), &text)]
            }
        }
    }
}

fn panic_text(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        String::new()
    }
}
