//! Ollama backend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ModelOptions;
use crate::error::LlmError;
use crate::llm::{GeneratorSource, TextGenerator};

const PROVIDER: &str = "ollama";

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: &'a ModelOptions,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Generator backed by a local Ollama server.
pub struct OllamaGenerator {
    client: reqwest::Client,
    base_url: String,
    model: String,
    options: ModelOptions,
}

impl OllamaGenerator {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        model: impl Into<String>,
        options: ModelOptions,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            options,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url)
    }
}

#[async_trait]
impl TextGenerator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: &self.options,
        };

        tracing::debug!(model = %self.model, prompt_len = prompt.len(), "Sending generate request");

        let response = self
            .client
            .post(self.endpoint())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout {
                        provider: PROVIDER.to_string(),
                    }
                } else {
                    LlmError::RequestFailed {
                        provider: PROVIDER.to_string(),
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: format!("HTTP {status}: {body}"),
            });
        }

        let parsed: GenerateResponse =
            response
                .json()
                .await
                .map_err(|e| LlmError::InvalidResponse {
                    provider: PROVIDER.to_string(),
                    reason: e.to_string(),
                })?;

        Ok(parsed.response)
    }
}

/// Source that shares one HTTP client across all agents' generators.
pub struct OllamaSource {
    client: reqwest::Client,
    base_url: String,
}

impl OllamaSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

impl GeneratorSource for OllamaSource {
    fn generator_for(
        &self,
        model: &str,
        options: &ModelOptions,
    ) -> Result<Arc<dyn TextGenerator>, LlmError> {
        Ok(Arc::new(OllamaGenerator::new(
            self.client.clone(),
            self.base_url.clone(),
            model,
            options.clone(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_strips_trailing_slash() {
        let generator = OllamaGenerator::new(
            reqwest::Client::new(),
            "http://localhost:11434/",
            "mistral",
            ModelOptions::new(),
        );
        assert_eq!(generator.endpoint(), "http://localhost:11434/api/generate");
        assert_eq!(generator.model_name(), "mistral");
    }

    #[test]
    fn test_request_shape() {
        let mut options = ModelOptions::new();
        options.insert("temperature".into(), serde_json::json!(0.3));
        let request = GenerateRequest {
            model: "mistral",
            prompt: "hi",
            stream: false,
            options: &options,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["stream"], serde_json::json!(false));
        assert_eq!(value["options"]["temperature"], serde_json::json!(0.3));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_error() {
        let source = OllamaSource::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let generator = source
            .generator_for("mistral", &ModelOptions::new())
            .unwrap();
        assert!(generator.generate("hello").await.is_err());
    }
}
