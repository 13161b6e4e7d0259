//! Error types for the agent relay.

use std::path::PathBuf;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to read {path}: {reason}")]
    ReadFailed { path: PathBuf, reason: String },

    #[error("Failed to parse {path}: {reason}")]
    ParseFailed { path: PathBuf, reason: String },
}

/// Message envelope construction errors.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("Message field '{field}' must not be empty")]
    EmptyField { field: &'static str },

    #[error("Unknown message type: {0}")]
    UnknownType(String),
}

/// Text generation errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Request to {provider} failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Request to {provider} timed out")]
    Timeout { provider: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Generation unavailable: {0}")]
    Unavailable(String),
}

/// Artifact store errors.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("Invalid artifact name: {name}")]
    InvalidName { name: String },

    #[error("Artifact not found: {name}")]
    NotFound { name: String },

    #[error("Artifact I/O failed at {path}: {reason}")]
    Io { path: PathBuf, reason: String },
}

/// Failures raised inside an agent's message handlers.
///
/// These never escape `process_message`; they are converted into ERROR replies.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error(transparent)]
    Message(#[from] MessageError),

    #[error(transparent)]
    Generation(#[from] LlmError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error("{0}")]
    Failed(String),
}

/// Agent construction errors.
#[derive(Debug, thiserror::Error)]
pub enum FactoryError {
    #[error("Unknown agent type: {role_tag}")]
    UnknownRole { role_tag: String },

    #[error("Failed to build generator for agent '{agent_id}': {source}")]
    Generator {
        agent_id: String,
        #[source]
        source: LlmError,
    },
}

/// Workflow setup errors, reported before any message is sent.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Task must not be empty")]
    EmptyTask,

    #[error("No coordinator agent found")]
    MissingCoordinator,

    #[error("Expected exactly one coordinator agent, found {count}")]
    DuplicateCoordinator { count: usize },

    #[error("Duplicate agent id: {agent_id}")]
    DuplicateAgentId { agent_id: String },

    #[error(transparent)]
    Factory(#[from] FactoryError),

    #[error(transparent)]
    Message(#[from] MessageError),
}

/// Observer delivery errors. Always logged, never propagated into a workflow.
#[derive(Debug, thiserror::Error)]
pub enum ObserverError {
    #[error("Observer '{name}' delivery failed: {reason}")]
    DeliveryFailed { name: String, reason: String },

    #[error("Observer '{name}' has invalid configuration: {reason}")]
    InvalidConfig { name: String, reason: String },
}
