//! Message routing and workflow driver.
//!
//! Delivery is depth-first: a send does not return until every reply it
//! triggers, and every reply to those replies, has been processed. The bus
//! keeps an explicit work stack rather than recursing; replies are pushed in
//! reverse so they pop in the order the agent returned them.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::core::{Agent, AgentStatus};
use crate::agent::factory::AgentFactory;
use crate::agent::message::{Message, MessageType};
use crate::agent::submission::{
    AgentDescriptor, AgentSnapshot, COORDINATOR_ID, SYSTEM_SENDER, WorkflowRequest, WorkflowResult,
};
use crate::config::Config;
use crate::error::WorkflowError;
use crate::observer::{ObserverEvent, ObserverSet, WorkflowStatus};

/// Messages per agent included in a snapshot.
const SNAPSHOT_MESSAGES: usize = 5;

/// One entry of the delivery trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub message_id: String,
    pub from_agent: String,
    pub to_agent: String,
    pub message_type: MessageType,
    /// False when the recipient was not registered.
    pub delivered: bool,
}

/// What happened during one top-level send.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReport {
    /// Every send in delivery order, including drops.
    pub trace: Vec<DeliveryRecord>,
    /// Set when the delivery limit stopped the cascade.
    pub truncated: bool,
    /// Messages left undelivered by truncation.
    pub pending: usize,
}

impl DeliveryReport {
    /// Number of messages handed to an agent.
    pub fn delivered(&self) -> usize {
        self.trace.iter().filter(|r| r.delivered).count()
    }

    /// Sends whose recipient was not registered.
    pub fn dropped(&self) -> impl Iterator<Item = &DeliveryRecord> {
        self.trace.iter().filter(|r| !r.delivered)
    }
}

/// Code, tests, and results produced by a workflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneratedOutput {
    pub code: Option<String>,
    pub code_file: Option<String>,
    pub test_code: Option<String>,
    pub test_file: Option<String>,
    pub test_results: Option<String>,
    pub tests_passed: Option<bool>,
}

/// One message in the workflow transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Routes messages between registered agents.
pub struct MessageBus {
    factory: AgentFactory,
    observers: ObserverSet,
    agents: BTreeMap<String, Box<dyn Agent>>,
    max_deliveries: usize,
    status_polls: u32,
    poll_interval: Duration,
    last_report: DeliveryReport,
}

impl MessageBus {
    pub fn new(factory: AgentFactory, observers: ObserverSet) -> Self {
        let defaults = Config::default();
        Self {
            factory,
            observers,
            agents: BTreeMap::new(),
            max_deliveries: defaults.max_deliveries,
            status_polls: defaults.status_polls,
            poll_interval: defaults.poll_interval,
            last_report: DeliveryReport::default(),
        }
    }

    /// Take delivery limit and polling settings from `config`.
    pub fn with_config(mut self, config: &Config) -> Self {
        self.max_deliveries = config.max_deliveries;
        self.status_polls = config.status_polls;
        self.poll_interval = config.poll_interval;
        self
    }

    pub fn with_max_deliveries(mut self, max: usize) -> Self {
        self.max_deliveries = max;
        self
    }

    pub fn with_polling(mut self, polls: u32, interval: Duration) -> Self {
        self.status_polls = polls;
        self.poll_interval = interval;
        self
    }

    /// Add an agent under its own id, replacing any agent with that id.
    pub fn register(&mut self, agent: Box<dyn Agent>) {
        self.agents.insert(agent.agent_id().to_string(), agent);
    }

    pub fn agent(&self, agent_id: &str) -> Option<&dyn Agent> {
        self.agents.get(agent_id).map(|a| a.as_ref())
    }

    pub fn agent_ids(&self) -> impl Iterator<Item = &str> {
        self.agents.keys().map(String::as_str)
    }

    /// Wait for observers to finish background deliveries.
    pub async fn flush_observers(&self) {
        self.observers.flush().await;
    }

    /// Report of the most recent workflow's initial send.
    pub fn last_report(&self) -> &DeliveryReport {
        &self.last_report
    }

    /// Deliver `message` and everything it triggers, depth-first.
    pub async fn send(&mut self, message: Message) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let mut stack = vec![message];

        while let Some(message) = stack.pop() {
            if report.delivered() >= self.max_deliveries {
                report.truncated = true;
                report.pending = stack.len() + 1;
                tracing::warn!(
                    limit = self.max_deliveries,
                    pending = report.pending,
                    "Delivery limit reached, stopping cascade"
                );
                break;
            }

            self.observers
                .notify(&ObserverEvent::agent_message(&message))
                .await;

            tracing::debug!(
                from = %message.from_agent(),
                to = %message.to_agent(),
                message_type = %message.message_type(),
                "Sending message"
            );

            let Some(agent) = self.agents.get_mut(message.to_agent()) else {
                tracing::warn!(to = %message.to_agent(), from = %message.from_agent(), "Recipient not found, dropping message");
                report.trace.push(record(&message, false));
                continue;
            };

            report.trace.push(record(&message, true));
            let replies = agent.process_message(message).await;
            stack.extend(replies.into_iter().rev());
        }

        report
    }

    /// Run `request` end to end.
    pub async fn run(&mut self, request: &WorkflowRequest) -> WorkflowResult {
        self.process_workflow(&request.task, &request.agents).await
    }

    /// Build the agents, send the task to the coordinator, and collect results.
    pub async fn process_workflow(
        &mut self,
        task: &str,
        descriptors: &[AgentDescriptor],
    ) -> WorkflowResult {
        let workflow_id = format!("workflow_{}", Uuid::new_v4().simple());
        self.last_report = DeliveryReport::default();

        let initial = match self.setup(task, descriptors) {
            Ok(initial) => initial,
            Err(e) => {
                tracing::warn!(workflow_id = %workflow_id, error = %e, "Workflow rejected");
                self.notify_status(&workflow_id, WorkflowStatus::Failed).await;
                return WorkflowResult::failed(e.to_string());
            }
        };

        tracing::info!(workflow_id = %workflow_id, agents = self.agents.len(), "Starting workflow");
        self.notify_status(&workflow_id, WorkflowStatus::Running).await;

        let report = self.send(initial).await;
        tracing::info!(
            workflow_id = %workflow_id,
            delivered = report.delivered(),
            dropped = report.dropped().count(),
            truncated = report.truncated,
            "Cascade finished"
        );
        self.last_report = report;

        for _ in 0..self.status_polls {
            tokio::time::sleep(self.poll_interval).await;
            self.notify_status(&workflow_id, WorkflowStatus::Running).await;
        }

        let results = self.snapshots();
        self.notify_status(&workflow_id, WorkflowStatus::Completed).await;
        WorkflowResult::completed(results)
    }

    fn setup(
        &mut self,
        task: &str,
        descriptors: &[AgentDescriptor],
    ) -> Result<Message, WorkflowError> {
        self.agents.clear();

        WorkflowRequest {
            task: task.to_string(),
            agents: descriptors.to_vec(),
        }
        .validate()?;

        let mut agents = BTreeMap::new();
        for descriptor in descriptors {
            let agent = self.factory.create(
                &descriptor.id,
                &descriptor.role_tag,
                &descriptor.role,
                descriptor.model.as_deref(),
                descriptor.model_config.as_ref(),
            )?;
            agents.insert(descriptor.id.clone(), agent);
        }
        self.agents = agents;

        Ok(Message::new(
            SYSTEM_SENDER,
            COORDINATOR_ID,
            MessageType::Task,
            task,
        )?)
    }

    async fn notify_status(&self, workflow_id: &str, status: WorkflowStatus) {
        let agents: BTreeMap<String, AgentStatus> = self
            .agents
            .iter()
            .map(|(id, agent)| (id.clone(), agent.status()))
            .collect();
        self.observers
            .notify(&ObserverEvent::WorkflowStatus {
                workflow_id: workflow_id.to_string(),
                status,
                agents,
            })
            .await;
    }

    /// Status, memory size, and recent messages of every agent.
    pub fn snapshots(&self) -> BTreeMap<String, AgentSnapshot> {
        self.agents
            .iter()
            .map(|(id, agent)| {
                let memory = agent.memory();
                (
                    id.clone(),
                    AgentSnapshot {
                        status: agent.status(),
                        memory_count: memory.len(),
                        last_messages: memory.last_contents(SNAPSHOT_MESSAGES),
                    },
                )
            })
            .collect()
    }

    /// Code, tests, and results found in the agents' memories.
    pub fn generated_output(&self) -> GeneratedOutput {
        let mut output = GeneratedOutput::default();

        for agent in self.agents.values() {
            for message in agent.memory().short_term() {
                if output.code.is_none()
                    && let Some(code) = message.metadata_str("code")
                {
                    output.code = Some(code.to_string());
                    output.code_file = message.metadata_str("filename").map(str::to_string);
                }
                if output.test_code.is_none()
                    && let Some(tests) = message.metadata_str("test_code")
                {
                    output.test_code = Some(tests.to_string());
                }
                if output.test_file.is_none()
                    && let Some(name) = message.metadata_str("filename")
                    && name.starts_with("test_")
                {
                    output.test_file = Some(name.to_string());
                }
                if output.test_results.is_none()
                    && let Some(results) = message.metadata_str("test_results")
                {
                    output.test_results = Some(results.to_string());
                    output.tests_passed = message
                        .metadata()
                        .get("tests_passed")
                        .and_then(|v| v.as_bool());
                }
            }
        }

        output
    }

    /// Every message held in any agent's memory, oldest first.
    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        let mut entries: Vec<TranscriptEntry> = self
            .agents
            .values()
            .flat_map(|agent| agent.memory().short_term())
            .map(|m| TranscriptEntry {
                from: m.from_agent().to_string(),
                to: m.to_agent().to_string(),
                message_type: m.message_type(),
                content: m.content().to_string(),
                timestamp: m.timestamp(),
            })
            .collect();
        entries.sort_by_key(|e| e.timestamp);
        entries
    }
}

fn record(message: &Message, delivered: bool) -> DeliveryRecord {
    DeliveryRecord {
        message_id: message.id().to_string(),
        from_agent: message.from_agent().to_string(),
        to_agent: message.to_agent().to_string(),
        message_type: message.message_type(),
        delivered,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    use crate::agent::core::{AgentCore, RoleType};
    use crate::agent::factory::AgentContext;
    use crate::config::{DEFAULT_MODEL, ModelOptions, ModelSettings};
    use crate::error::{AgentError, LlmError};
    use crate::llm::{
        FailingGenerator, GeneratorSource, ScriptedGenerator, ScriptedSource, TextGenerator,
    };
    use crate::sandbox::Sandbox;
    use crate::workspace::ArtifactStore;

    /// Forwards each TASK to a fixed list of recipients.
    struct Relay {
        core: AgentCore,
        targets: Vec<&'static str>,
    }

    impl Relay {
        fn boxed(id: &str, targets: Vec<&'static str>) -> Box<dyn Agent> {
            Box::new(Self {
                core: AgentCore::new(id, "relay", "relay", "none", Arc::new(FailingGenerator)),
                targets,
            })
        }
    }

    #[async_trait]
    impl Agent for Relay {
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
            self.targets
                .iter()
                .map(|to| {
                    let content = format!("{} via {}", message.content(), self.core.agent_id());
                    self.core.message(to, MessageType::Task, content)
                })
                .collect()
        }
    }

    fn bus() -> MessageBus {
        let dir = std::env::temp_dir();
        let context = AgentContext::new(
            Arc::new(ScriptedSource::new(Arc::new(ScriptedGenerator::new()))),
            Arc::new(ArtifactStore::new(dir.join("agent-relay-bus-tests"))),
            Arc::new(Sandbox::new("sh", Duration::from_secs(1))),
            Arc::new(ModelSettings::builtin(false)),
        );
        MessageBus::new(AgentFactory::new(context), ObserverSet::new())
            .with_polling(0, Duration::ZERO)
    }

    fn path(report: &DeliveryReport) -> Vec<String> {
        report
            .trace
            .iter()
            .map(|r| format!("{}>{}:{}", r.from_agent, r.to_agent, r.message_type))
            .collect()
    }

    #[tokio::test]
    async fn test_delivery_is_depth_first() {
        let mut bus = bus();
        bus.register(Relay::boxed("a", vec!["b", "c"]));
        bus.register(Relay::boxed("b", vec!["d"]));
        bus.register(Relay::boxed("c", vec![]));
        bus.register(Relay::boxed("d", vec![]));

        let start = Message::new("system", "a", MessageType::Task, "go").unwrap();
        let report = bus.send(start).await;

        assert_eq!(
            path(&report),
            vec![
                "system>a:task",
                "a>b:task",
                "b>d:task",
                "a>c:task",
            ]
        );
        assert_eq!(report.delivered(), 4);
        assert!(!report.truncated);
    }

    #[tokio::test]
    async fn test_unknown_recipient_is_dropped_and_reported() {
        let mut bus = bus();
        bus.register(Relay::boxed("a", vec!["ghost", "b"]));
        bus.register(Relay::boxed("b", vec![]));

        let report = bus
            .send(Message::new("system", "a", MessageType::Task, "go").unwrap())
            .await;

        let dropped: Vec<&str> = report.dropped().map(|r| r.to_agent.as_str()).collect();
        assert_eq!(dropped, vec!["ghost"]);
        assert_eq!(report.delivered(), 2);
    }

    #[tokio::test]
    async fn test_delivery_limit_truncates_cycles() {
        let mut bus = bus().with_max_deliveries(5);
        bus.register(Relay::boxed("a", vec!["b"]));
        bus.register(Relay::boxed("b", vec!["a"]));

        let report = bus
            .send(Message::new("system", "a", MessageType::Task, "loop").unwrap())
            .await;

        assert!(report.truncated);
        assert_eq!(report.delivered(), 5);
        assert_eq!(report.pending, 1);
    }

    #[tokio::test]
    async fn test_missing_coordinator_fails_before_sending() {
        let mut bus = bus();
        let result = bus
            .process_workflow(
                "write add",
                &[AgentDescriptor::new("coder", "coder", "codes")],
            )
            .await;

        assert!(!result.success);
        assert!(result.results.is_empty());
        assert_eq!(result.message, "No coordinator agent found");
        assert!(bus.last_report().trace.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_role_fails_before_sending() {
        let mut bus = bus();
        let result = bus
            .process_workflow(
                "write add",
                &[
                    AgentDescriptor::new("coordinator", "coordinator", "plans"),
                    AgentDescriptor::new("gh", "github", "pushes"),
                ],
            )
            .await;

        assert!(!result.success);
        assert!(result.results.is_empty());
        assert!(result.message.contains("Unknown agent type: github"));
        assert_eq!(bus.agent_ids().count(), 0);
    }

    /// Records the model and options each generator was built with.
    #[derive(Default)]
    struct RecordingSource {
        built: std::sync::Mutex<Vec<(String, ModelOptions)>>,
    }

    impl GeneratorSource for RecordingSource {
        fn generator_for(
            &self,
            model: &str,
            options: &ModelOptions,
        ) -> Result<Arc<dyn TextGenerator>, LlmError> {
            self.built
                .lock()
                .unwrap()
                .push((model.to_string(), options.clone()));
            Ok(Arc::new(FailingGenerator))
        }
    }

    #[tokio::test]
    async fn test_descriptor_model_overrides_reach_generators() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(RecordingSource::default());
        let context = AgentContext::new(
            source.clone(),
            Arc::new(ArtifactStore::new(dir.path())),
            Arc::new(Sandbox::new("sh", Duration::from_secs(1))),
            Arc::new(ModelSettings::builtin(false)),
        );
        let mut bus = MessageBus::new(AgentFactory::new(context), ObserverSet::new())
            .with_polling(0, Duration::ZERO);

        let mut options = ModelOptions::new();
        options.insert("temperature".to_string(), serde_json::json!(0.1));
        let agents = [
            AgentDescriptor::new("coordinator", "coordinator", "plans"),
            AgentDescriptor::new("coder", "coder", "codes")
                .with_model("codellama")
                .with_model_config(options),
        ];
        let result = bus.process_workflow("write add", &agents).await;

        assert!(result.success);
        assert_eq!(bus.agent("coder").unwrap().core().model(), "codellama");
        assert_eq!(bus.agent("coordinator").unwrap().core().model(), DEFAULT_MODEL);

        let built = source.built.lock().unwrap();
        let (_, coder_options) = built.iter().find(|(model, _)| model == "codellama").unwrap();
        assert_eq!(coder_options["temperature"], serde_json::json!(0.1));
    }
}
