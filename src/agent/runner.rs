//! Runner role: executes code against its tests and reports the outcome.

use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::core::{Agent, AgentCore, RoleType};
use crate::agent::factory::AgentContext;
use crate::agent::message::{Message, MessageType, Metadata};
use crate::error::AgentError;
use crate::sandbox::Sandbox;

pub struct RunnerAgent {
    core: AgentCore,
    sandbox: Arc<Sandbox>,
}

impl RunnerAgent {
    pub fn new(core: AgentCore, sandbox: Arc<Sandbox>) -> Self {
        Self { core, sandbox }
    }

    pub fn build(core: AgentCore, ctx: &AgentContext) -> Box<dyn Agent> {
        Box::new(Self::new(core, Arc::clone(&ctx.sandbox)))
    }
}

#[async_trait]
impl Agent for RunnerAgent {
    fn core(&self) -> &AgentCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut AgentCore {
        &mut self.core
    }

    fn role(&self) -> RoleType {
        RoleType::Runner
    }

    async fn handle_task(&mut self, message: &Message) -> Result<Vec<Message>, AgentError> {
        let reply = self.core.message(
            message.from_agent(),
            MessageType::Response,
            format!("Runner agent received task: {}", message.content()),
        )?;
        Ok(vec![reply])
    }

    async fn handle_data(&mut self, message: &Message) -> Result<Vec<Message>, AgentError> {
        let Some(test_code) = message.metadata_str("test_code") else {
            return Ok(vec![self
                .core
                .error_message(message.from_agent(), "No test code provided")]);
        };
        let Some(original_code) = message.metadata_str("original_code") else {
            return Ok(vec![self
                .core
                .error_message(message.from_agent(), "No original code provided")]);
        };

        tracing::info!(agent = %self.core.agent_id(), from = %message.from_agent(), "Runner executing tests");

        let report = self.sandbox.run(original_code, test_code).await;

        let mut metadata = Metadata::new();
        metadata.insert(
            "test_results".to_string(),
            serde_json::json!(report.render(self.sandbox.timeout())),
        );
        metadata.insert("tests_passed".to_string(), serde_json::json!(report.passed()));
        metadata.insert("outcome".to_string(), serde_json::json!(report.outcome.as_str()));
        metadata.insert("original_code".to_string(), serde_json::json!(original_code));
        metadata.insert("test_code".to_string(), serde_json::json!(test_code));

        let reply = self.core.message_with(
            message.from_agent(),
            MessageType::Data,
            "Test execution completed",
            metadata,
        )?;
        Ok(vec![reply])
    }
}
