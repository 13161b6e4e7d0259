//! Text generation capability.
//!
//! Agents see generation as an opaque function: prompt in, text out. The
//! backends here are:
//! - **Ollama**: non-streaming `/api/generate` over HTTP
//! - **Scripted**: canned replies keyed by prompt substrings, for offline runs
//! - **Failing**: always errors, for exercising fallback paths

mod extract;
mod ollama;
mod reasoning;
mod scripted;

pub use extract::{extract_code, extract_test_code};
pub use ollama::{OllamaGenerator, OllamaSource};
pub use reasoning::{Plan, PlanStep, fallback_plan, parse_plan, planning_prompt};
pub use scripted::{FailingGenerator, ScriptedGenerator, ScriptedSource};

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ModelOptions;
use crate::error::LlmError;

/// Prompt in, response text out.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Name used in logs and errors.
    fn model_name(&self) -> &str;

    /// Generate a single response for `prompt`.
    async fn generate(&self, prompt: &str) -> Result<String, LlmError>;
}

/// Builds one generator per agent from its model name and resolved options.
pub trait GeneratorSource: Send + Sync {
    fn generator_for(
        &self,
        model: &str,
        options: &ModelOptions,
    ) -> Result<Arc<dyn TextGenerator>, LlmError>;
}
