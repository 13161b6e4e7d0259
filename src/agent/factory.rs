//! Agent construction registry.

use std::collections::HashMap;
use std::sync::Arc;

use crate::agent::coder::CoderAgent;
use crate::agent::coordinator::CoordinatorAgent;
use crate::agent::core::{Agent, AgentCore};
use crate::agent::runner::RunnerAgent;
use crate::agent::tester::TesterAgent;
use crate::config::{DEFAULT_MODEL, ModelOptions, ModelSettings};
use crate::error::FactoryError;
use crate::llm::GeneratorSource;
use crate::sandbox::Sandbox;
use crate::sandbox::syntax::SyntaxChecker;
use crate::workspace::ArtifactStore;

/// Builds a role around a prepared core.
pub type AgentConstructor = fn(AgentCore, &AgentContext) -> Box<dyn Agent>;

/// Shared collaborators handed to every constructor.
#[derive(Clone)]
pub struct AgentContext {
    pub generators: Arc<dyn GeneratorSource>,
    pub store: Arc<ArtifactStore>,
    pub sandbox: Arc<Sandbox>,
    /// Validates generated Python before it is persisted.
    pub syntax: Arc<SyntaxChecker>,
    pub settings: Arc<ModelSettings>,
    /// Model used when a descriptor names none.
    pub default_model: String,
}

impl AgentContext {
    pub fn new(
        generators: Arc<dyn GeneratorSource>,
        store: Arc<ArtifactStore>,
        sandbox: Arc<Sandbox>,
        settings: Arc<ModelSettings>,
    ) -> Self {
        Self {
            generators,
            store,
            sandbox,
            syntax: Arc::new(SyntaxChecker::default()),
            settings,
            default_model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn with_syntax_checker(mut self, syntax: SyntaxChecker) -> Self {
        self.syntax = Arc::new(syntax);
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }
}

/// Maps role tags to constructors.
pub struct AgentFactory {
    context: AgentContext,
    constructors: HashMap<String, AgentConstructor>,
}

impl AgentFactory {
    /// A factory with no roles registered.
    pub fn empty(context: AgentContext) -> Self {
        Self {
            context,
            constructors: HashMap::new(),
        }
    }

    /// A factory with the coordinator, coder, tester, and runner roles.
    pub fn new(context: AgentContext) -> Self {
        let mut factory = Self::empty(context);
        factory.register("coordinator", CoordinatorAgent::build);
        factory.register("coder", CoderAgent::build);
        factory.register("tester", TesterAgent::build);
        factory.register("runner", RunnerAgent::build);
        factory
    }

    /// Register or replace a constructor.
    pub fn register(&mut self, role_tag: impl Into<String>, constructor: AgentConstructor) {
        self.constructors.insert(role_tag.into(), constructor);
    }

    /// Registered role tags, sorted.
    pub fn registered_roles(&self) -> Vec<&str> {
        let mut roles: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        roles.sort_unstable();
        roles
    }

    /// Build an agent for `role_tag`.
    pub fn create(
        &self,
        agent_id: &str,
        role_tag: &str,
        description: &str,
        model: Option<&str>,
        model_config: Option<&ModelOptions>,
    ) -> Result<Box<dyn Agent>, FactoryError> {
        let constructor =
            self.constructors
                .get(role_tag)
                .ok_or_else(|| FactoryError::UnknownRole {
                    role_tag: role_tag.to_string(),
                })?;

        let model = model
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(self.context.default_model.as_str());
        let options = self.context.settings.resolve(model, model_config);
        let generator = self
            .context
            .generators
            .generator_for(model, &options)
            .map_err(|source| FactoryError::Generator {
                agent_id: agent_id.to_string(),
                source,
            })?;

        tracing::debug!(agent = %agent_id, role = %role_tag, model = %model, "Creating agent");

        let core = AgentCore::new(agent_id, role_tag, description, model, generator);
        Ok(constructor(core, &self.context))
    }
}
