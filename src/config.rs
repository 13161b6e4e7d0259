//! Runtime configuration.
//!
//! Settings come from `AGENT_RELAY_*` environment variables (a `.env` file is
//! honored when the binary loads it) and an optional TOML file with per-model
//! option tables.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Generation options for one model, e.g. `temperature` or `num_ctx`.
pub type ModelOptions = serde_json::Map<String, serde_json::Value>;

/// Model used when a descriptor names none.
pub const DEFAULT_MODEL: &str = "mistral";

/// Top-level configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub ollama_base_url: String,
    pub default_model: String,
    pub models_file: Option<PathBuf>,
    pub artifact_dir: PathBuf,
    pub python: String,
    pub exec_timeout: Duration,
    pub llm_timeout: Duration,
    /// Status polls after the initial cascade returns.
    pub status_polls: u32,
    pub poll_interval: Duration,
    /// Upper bound on deliveries per workflow.
    pub max_deliveries: usize,
    pub webhook_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ollama_base_url: "http://localhost:11434".to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            models_file: None,
            artifact_dir: PathBuf::from("generated"),
            python: "python3".to_string(),
            exec_timeout: Duration::from_secs(30),
            llm_timeout: Duration::from_secs(300),
            status_polls: 10,
            poll_interval: Duration::from_millis(200),
            max_deliveries: 1000,
            webhook_url: None,
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let exec_timeout_secs: u64 = parse_optional_env("AGENT_RELAY_EXEC_TIMEOUT_SECS", 30)?;
        let llm_timeout_secs: u64 = parse_optional_env("AGENT_RELAY_LLM_TIMEOUT_SECS", 300)?;
        let poll_interval_ms: u64 = parse_optional_env("AGENT_RELAY_POLL_INTERVAL_MS", 200)?;

        if exec_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "AGENT_RELAY_EXEC_TIMEOUT_SECS".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        let webhook_url = optional_env("AGENT_RELAY_WEBHOOK_URL");
        if let Some(ref url) = webhook_url
            && reqwest::Url::parse(url).is_err()
        {
            return Err(ConfigError::InvalidValue {
                key: "AGENT_RELAY_WEBHOOK_URL".to_string(),
                message: format!("'{url}' is not a valid URL"),
            });
        }

        Ok(Self {
            ollama_base_url: optional_env("OLLAMA_BASE_URL").unwrap_or(defaults.ollama_base_url),
            default_model: optional_env("AGENT_RELAY_DEFAULT_MODEL")
                .unwrap_or(defaults.default_model),
            models_file: optional_env("AGENT_RELAY_MODELS_FILE").map(PathBuf::from),
            artifact_dir: optional_env("AGENT_RELAY_ARTIFACT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.artifact_dir),
            python: optional_env("AGENT_RELAY_PYTHON").unwrap_or(defaults.python),
            exec_timeout: Duration::from_secs(exec_timeout_secs),
            llm_timeout: Duration::from_secs(llm_timeout_secs),
            status_polls: parse_optional_env("AGENT_RELAY_STATUS_POLLS", defaults.status_polls)?,
            poll_interval: Duration::from_millis(poll_interval_ms),
            max_deliveries: parse_optional_env(
                "AGENT_RELAY_MAX_DELIVERIES",
                defaults.max_deliveries,
            )?,
            webhook_url,
        })
    }
}

/// Read an env var, treating unset and blank as absent.
fn optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_optional_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional_env(key) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{raw}': {e}"),
        }),
        None => Ok(default),
    }
}

/// Shape of the optional models file.
///
/// ```toml
/// [models."codellama:7b-instruct"]
/// temperature = 0.2
/// ```
#[derive(Debug, Default, Deserialize)]
struct ModelsFile {
    #[serde(default)]
    models: BTreeMap<String, toml::Table>,
}

/// Immutable generation options, built once at startup.
///
/// Per-agent options resolve as base defaults, then the per-model table, then
/// descriptor overrides, later layers winning key by key.
#[derive(Debug, Clone)]
pub struct ModelSettings {
    base: ModelOptions,
    per_model: BTreeMap<String, ModelOptions>,
}

impl ModelSettings {
    /// Built-in tables. `gpu` selects `num_gpu` for every table.
    pub fn builtin(gpu: bool) -> Self {
        let num_gpu = if gpu { 1 } else { 0 };

        let base = options(serde_json::json!({
            "num_gpu": num_gpu,
            "num_thread": 8,
            "temperature": 0.3,
            "top_p": 0.9,
            "repeat_penalty": 1.1,
            "top_k": 40,
            "num_ctx": 4096,
        }));

        let mut per_model = BTreeMap::new();
        per_model.insert(
            "codellama:7b-instruct".to_string(),
            options(serde_json::json!({
                "num_gpu": num_gpu,
                "num_thread": 8,
                "temperature": 0.3,
                "top_p": 0.9,
                "repeat_penalty": 1.1,
                "top_k": 40,
                "num_ctx": 4096,
            })),
        );
        per_model.insert(
            "mistral".to_string(),
            options(serde_json::json!({
                "num_gpu": num_gpu,
                "num_thread": 8,
                "temperature": 0.7,
                "top_p": 0.9,
                "repeat_penalty": 1.1,
            })),
        );
        per_model.insert(
            "llama2".to_string(),
            options(serde_json::json!({
                "num_gpu": num_gpu,
                "num_thread": 8,
                "temperature": 0.5,
                "top_p": 0.9,
                "repeat_penalty": 1.1,
            })),
        );

        Self { base, per_model }
    }

    /// Built-in tables with GPU detection and the configured models file merged in.
    pub async fn load(config: &Config) -> Result<Self, ConfigError> {
        let mut settings = Self::builtin(detect_gpu().await);
        if let Some(ref path) = config.models_file {
            settings.merge_file(path).await?;
        }
        Ok(settings)
    }

    /// Merge per-model tables from a TOML file over the current ones.
    pub async fn merge_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ConfigError::ReadFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        self.merge_toml(&raw).map_err(|reason| ConfigError::ParseFailed {
            path: path.to_path_buf(),
            reason,
        })
    }

    fn merge_toml(&mut self, raw: &str) -> Result<(), String> {
        let file: ModelsFile = toml::from_str(raw).map_err(|e| e.to_string())?;
        for (model, table) in file.models {
            let value = serde_json::to_value(table).map_err(|e| e.to_string())?;
            let serde_json::Value::Object(overrides) = value else {
                return Err(format!("model table '{model}' is not a table"));
            };
            let entry = self
                .per_model
                .entry(model)
                .or_insert_with(|| self.base.clone());
            entry.extend(overrides);
        }
        Ok(())
    }

    /// Names of models with a dedicated table.
    pub fn known_models(&self) -> impl Iterator<Item = &str> {
        self.per_model.keys().map(String::as_str)
    }

    /// Resolve the options for `model` with optional descriptor overrides.
    pub fn resolve(&self, model: &str, overrides: Option<&ModelOptions>) -> ModelOptions {
        let mut resolved = self.base.clone();
        if let Some(table) = self.per_model.get(model) {
            resolved.extend(table.clone());
        }
        if let Some(overrides) = overrides {
            resolved.extend(overrides.clone());
        }
        resolved
    }
}

fn options(value: serde_json::Value) -> ModelOptions {
    match value {
        serde_json::Value::Object(map) => map,
        _ => ModelOptions::new(),
    }
}

/// Check for an NVIDIA GPU by running `nvidia-smi`.
pub async fn detect_gpu() -> bool {
    let detected = tokio::process::Command::new("nvidia-smi")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .kill_on_drop(true)
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false);
    tracing::info!(gpu = detected, "GPU detection finished");
    detected
}
