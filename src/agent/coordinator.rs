//! Coordinator role: turns a task into TASK messages for other agents.

use async_trait::async_trait;

use crate::agent::core::{Agent, AgentCore, RoleType};
use crate::agent::factory::AgentContext;
use crate::agent::message::{Message, MessageType, Metadata};
use crate::error::AgentError;
use crate::llm::{Plan, fallback_plan, parse_plan, planning_prompt};

pub struct CoordinatorAgent {
    core: AgentCore,
}

impl CoordinatorAgent {
    pub fn new(core: AgentCore) -> Self {
        Self { core }
    }

    pub fn build(core: AgentCore, _ctx: &AgentContext) -> Box<dyn Agent> {
        Box::new(Self::new(core))
    }

    async fn plan(&self, task: &str) -> Plan {
        let prompt = planning_prompt(task, &self.core.memory.context_projection());

        let response = match self.core.generator().generate(&prompt).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(agent = %self.core.agent_id(), error = %e, "Planning generation failed, using fallback plan");
                return fallback_plan(task);
            }
        };

        match parse_plan(&response) {
            Ok(plan) => plan,
            Err(e) => {
                tracing::info!(agent = %self.core.agent_id(), error = %e, "Unusable plan, using fallback plan");
                fallback_plan(task)
            }
        }
    }
}

#[async_trait]
impl Agent for CoordinatorAgent {
    fn core(&self) -> &AgentCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut AgentCore {
        &mut self.core
    }

    fn role(&self) -> RoleType {
        RoleType::Coordinator
    }

    async fn handle_task(&mut self, message: &Message) -> Result<Vec<Message>, AgentError> {
        tracing::info!(agent = %self.core.agent_id(), task = %message.content(), "Coordinator received task");

        let plan = self.plan(message.content()).await;

        plan.steps
            .iter()
            .map(|step| {
                let mut metadata = Metadata::new();
                metadata.insert("priority".to_string(), serde_json::json!(step.priority));
                self.core
                    .message_with(&step.agent, MessageType::Task, step.task.clone(), metadata)
            })
            .collect()
    }
}
