//! Coder role: generates implementation code and hands it to the tester.

use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::core::{Agent, AgentCore, RoleType};
use crate::agent::factory::AgentContext;
use crate::agent::message::{Message, MessageType, Metadata};
use crate::error::AgentError;
use crate::llm::extract_code;
use crate::workspace::{ArtifactKind, ArtifactStore};

/// Agent that receives generated code.
pub const DOWNSTREAM: &str = "tester";

pub struct CoderAgent {
    core: AgentCore,
    store: Arc<ArtifactStore>,
}

impl CoderAgent {
    pub fn new(core: AgentCore, store: Arc<ArtifactStore>) -> Self {
        Self { core, store }
    }

    pub fn build(core: AgentCore, ctx: &AgentContext) -> Box<dyn Agent> {
        Box::new(Self::new(core, Arc::clone(&ctx.store)))
    }
}

fn code_prompt(role: &str, task: &str) -> String {
    format!(
        r#"You are an expert Python developer. Generate ONLY clean, working Python code.

{role}Task: {task}

CRITICAL REQUIREMENTS:
- Generate ONLY the Python code, NO explanations, NO comments, NO markdown
- Write complete, runnable Python functions
- Include proper error handling with try/except
- Add type hints and docstrings
- Follow PEP 8 style guidelines
- DO NOT include any explanatory text or comments outside the code
- DO NOT use markdown formatting or code blocks
- DO NOT add "Here's the code:" or similar text

Generate ONLY the function code, nothing else."#
    )
}

#[async_trait]
impl Agent for CoderAgent {
    fn core(&self) -> &AgentCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut AgentCore {
        &mut self.core
    }

    fn role(&self) -> RoleType {
        RoleType::Coder
    }

    async fn handle_task(&mut self, message: &Message) -> Result<Vec<Message>, AgentError> {
        tracing::info!(agent = %self.core.agent_id(), task = %message.content(), "Coder received task");

        let response = self
            .core
            .generator()
            .generate(&code_prompt(&self.core.role_preamble(), message.content()))
            .await
            .map_err(|e| AgentError::Failed(format!("Code generation failed: {e}")))?;

        let code = extract_code(&response);
        if code.is_empty() {
            tracing::warn!(agent = %self.core.agent_id(), "No code found in model output");
        }

        let artifact = self.store.persist(ArtifactKind::Code, &code).await?;

        let mut metadata = Metadata::new();
        metadata.insert("code".to_string(), serde_json::json!(code));
        metadata.insert("filename".to_string(), serde_json::json!(artifact.name));
        metadata.insert(
            "filepath".to_string(),
            serde_json::json!(artifact.path.display().to_string()),
        );

        let to_requester = self.core.message_with(
            message.from_agent(),
            MessageType::Data,
            format!("Generated code saved to {}", artifact.name),
            metadata.clone(),
        )?;
        let to_tester = self.core.message_with(
            DOWNSTREAM,
            MessageType::Data,
            "Code generated for testing",
            metadata,
        )?;

        Ok(vec![to_requester, to_tester])
    }
}
