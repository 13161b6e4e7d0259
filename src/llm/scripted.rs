//! Deterministic generators for offline runs and tests.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ModelOptions;
use crate::error::LlmError;
use crate::llm::{GeneratorSource, TextGenerator};

/// Replies with the first rule whose needle occurs in the prompt.
#[derive(Debug, Clone, Default)]
pub struct ScriptedGenerator {
    rules: Vec<(String, String)>,
    fallback: Option<String>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply with `reply` when the prompt contains `needle`.
    pub fn with_rule(mut self, needle: impl Into<String>, reply: impl Into<String>) -> Self {
        self.rules.push((needle.into(), reply.into()));
        self
    }

    /// Reply used when no rule matches. Without one, unmatched prompts fail.
    pub fn with_fallback(mut self, reply: impl Into<String>) -> Self {
        self.fallback = Some(reply.into());
        self
    }

    /// A script that drives the whole default pipeline without a model.
    ///
    /// Planning replies are deliberately not JSON so the coordinator uses its
    /// fallback plan.
    pub fn offline_pipeline() -> Self {
        Self::new()
            .with_rule(
                "coordinator managing",
                "I would split this into a coding step and a testing step.",
            )
            .with_rule(
                "expert Python developer",
                "Here is the code:\n```python\ndef add(a: int, b: int) -> int:\n    return a + b\n```",
            )
            .with_rule(
                "expert Python tester",
                "```python\nimport unittest\n\nclass TestAdd(unittest.TestCase):\n    def test_add(self):\n        self.assertEqual(add(2, 3), 5)\n\n    def test_negative(self):\n        self.assertEqual(add(-1, 1), 0)\n\nif __name__ == \"__main__\":\n    unittest.main()\n```",
            )
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        self.rules
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map(|(_, reply)| reply.clone())
            .or_else(|| self.fallback.clone())
            .ok_or_else(|| LlmError::InvalidResponse {
                provider: "scripted".to_string(),
                reason: "no scripted reply matches the prompt".to_string(),
            })
    }
}

/// Always fails.
#[derive(Debug, Clone, Default)]
pub struct FailingGenerator;

#[async_trait]
impl TextGenerator for FailingGenerator {
    fn model_name(&self) -> &str {
        "failing"
    }

    async fn generate(&self, _prompt: &str) -> Result<String, LlmError> {
        Err(LlmError::Unavailable("generation disabled".to_string()))
    }
}

/// Hands the same generator to every agent regardless of model.
#[derive(Clone)]
pub struct ScriptedSource {
    generator: Arc<dyn TextGenerator>,
}

impl ScriptedSource {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }
}

impl GeneratorSource for ScriptedSource {
    fn generator_for(
        &self,
        _model: &str,
        _options: &ModelOptions,
    ) -> Result<Arc<dyn TextGenerator>, LlmError> {
        Ok(Arc::clone(&self.generator))
    }
}
