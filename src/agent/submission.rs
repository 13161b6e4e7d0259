//! Workflow request and result types.
//!
//! A request names a task and the agents that will work on it; the result
//! reports, per agent, where it ended up.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::agent::core::AgentStatus;
use crate::config::ModelOptions;
use crate::error::WorkflowError;

/// Id the initial task is addressed to.
pub const COORDINATOR_ID: &str = "coordinator";

/// Sender id of the initial task.
pub const SYSTEM_SENDER: &str = "system";

/// One agent to instantiate for a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    /// Unique id within the workflow; also the routing address.
    pub id: String,
    /// Registry tag selecting the constructor.
    #[serde(rename = "type")]
    pub role_tag: String,
    /// Free-text description of the agent's role.
    #[serde(default)]
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_config: Option<ModelOptions>,
}

impl AgentDescriptor {
    pub fn new(
        id: impl Into<String>,
        role_tag: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            role_tag: role_tag.into(),
            role: role.into(),
            model: None,
            model_config: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_model_config(mut self, config: ModelOptions) -> Self {
        self.model_config = Some(config);
        self
    }
}

/// Descriptors for the coordinator, coder, tester, runner pipeline.
pub fn default_pipeline() -> Vec<AgentDescriptor> {
    vec![
        AgentDescriptor::new(
            "coordinator",
            "coordinator",
            "Breaks tasks into steps and assigns them",
        ),
        AgentDescriptor::new("coder", "coder", "Writes Python code"),
        AgentDescriptor::new("tester", "tester", "Writes unit tests for generated code"),
        AgentDescriptor::new("runner", "runner", "Executes tests and reports results"),
    ]
}

/// A task plus the agents that should handle it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRequest {
    pub task: String,
    #[serde(default = "default_pipeline")]
    pub agents: Vec<AgentDescriptor>,
}

impl WorkflowRequest {
    /// A request using the default pipeline.
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            agents: default_pipeline(),
        }
    }

    pub fn with_agents(mut self, agents: Vec<AgentDescriptor>) -> Self {
        self.agents = agents;
        self
    }

    /// Check the request before any agent is built.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.task.trim().is_empty() {
            return Err(WorkflowError::EmptyTask);
        }

        let coordinators = self
            .agents
            .iter()
            .filter(|a| a.id == COORDINATOR_ID)
            .count();
        match coordinators {
            0 => return Err(WorkflowError::MissingCoordinator),
            1 => {}
            count => return Err(WorkflowError::DuplicateCoordinator { count }),
        }

        let mut seen = HashSet::new();
        for agent in &self.agents {
            if !seen.insert(agent.id.as_str()) {
                return Err(WorkflowError::DuplicateAgentId {
                    agent_id: agent.id.clone(),
                });
            }
        }

        Ok(())
    }
}

/// Final state of one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub status: AgentStatus,
    /// Messages currently held in short-term memory.
    pub memory_count: usize,
    /// Contents of the most recent messages, oldest first.
    pub last_messages: Vec<String>,
}

/// Outcome of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub success: bool,
    /// Per-agent snapshots keyed by agent id.
    pub results: BTreeMap<String, AgentSnapshot>,
    pub message: String,
}

impl WorkflowResult {
    pub fn completed(results: BTreeMap<String, AgentSnapshot>) -> Self {
        Self {
            success: true,
            results,
            message: "Workflow completed successfully".to_string(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            results: BTreeMap::new(),
            message: message.into(),
        }
    }
}
