use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt as _, util::SubscriberInitExt as _};

use agent_relay::agent::{
    AgentContext, AgentDescriptor, AgentFactory, MessageBus, WorkflowRequest,
};
use agent_relay::config::{Config, ModelSettings};
use agent_relay::llm::{GeneratorSource, OllamaSource, ScriptedGenerator, ScriptedSource};
use agent_relay::observer::{LogObserver, ObserverSet, WebhookConfig, WebhookObserver};
use agent_relay::sandbox::Sandbox;
use agent_relay::sandbox::syntax::{DEFAULT_CHECK_TIMEOUT, SyntaxChecker};
use agent_relay::workspace::ArtifactStore;

#[derive(Parser, Debug)]
#[command(name = "agent-relay", version, about = "Run a coordinator/coder/tester/runner pipeline")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a workflow for a task.
    Run {
        /// Task handed to the coordinator.
        #[arg(short, long)]
        task: String,

        /// JSON file with a list of agent descriptors. Defaults to the four-role pipeline.
        #[arg(short, long)]
        agents: Option<PathBuf>,

        /// Use canned model replies instead of Ollama.
        #[arg(long)]
        offline: bool,

        /// Include every exchanged message in the output.
        #[arg(long)]
        transcript: bool,
    },
    /// List or print generated artifacts.
    Artifacts {
        /// Print the named artifact instead of listing.
        #[arg(long)]
        show: Option<String>,
    },
    /// Show the resolved generation options for each known model.
    Models,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_logging(cli.log_json, cli.verbose);

    let config = Config::from_env().context("invalid configuration")?;

    match cli.command {
        Command::Run {
            task,
            agents,
            offline,
            transcript,
        } => run(&config, task, agents, offline, transcript).await,
        Command::Artifacts { show } => artifacts(&config, show).await,
        Command::Models => models(&config).await,
    }
}

fn init_logging(json: bool, verbose: bool) {
    let default = if verbose {
        "agent_relay=debug"
    } else {
        "agent_relay=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn run(
    config: &Config,
    task: String,
    agents: Option<PathBuf>,
    offline: bool,
    transcript: bool,
) -> anyhow::Result<()> {
    let mut request = WorkflowRequest::new(task);
    if let Some(path) = agents {
        let raw = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let descriptors: Vec<AgentDescriptor> = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        request = request.with_agents(descriptors);
    }

    let generators: Arc<dyn GeneratorSource> = if offline {
        tracing::info!("Offline mode: using canned model replies");
        Arc::new(ScriptedSource::new(Arc::new(
            ScriptedGenerator::offline_pipeline(),
        )))
    } else {
        Arc::new(OllamaSource::new(
            config.ollama_base_url.clone(),
            config.llm_timeout,
        )?)
    };

    let context = AgentContext::new(
        generators,
        Arc::new(ArtifactStore::new(config.artifact_dir.clone())),
        Arc::new(Sandbox::new(config.python.clone(), config.exec_timeout)),
        Arc::new(ModelSettings::load(config).await?),
    )
    .with_syntax_checker(SyntaxChecker::new(config.python.clone(), DEFAULT_CHECK_TIMEOUT))
    .with_default_model(config.default_model.clone());

    let mut observers = ObserverSet::new().with(Arc::new(LogObserver));
    if let Some(ref url) = config.webhook_url {
        let webhook = WebhookObserver::from_config(WebhookConfig::new("webhook", url.clone()))?;
        observers.push(Arc::new(webhook));
    }

    let mut bus = MessageBus::new(AgentFactory::new(context), observers).with_config(config);
    let result = bus.run(&request).await;
    bus.flush_observers().await;

    let mut output = serde_json::json!({
        "result": result,
        "generated": bus.generated_output(),
        "delivery": {
            "delivered": bus.last_report().delivered(),
            "dropped": bus.last_report().dropped().count(),
            "truncated": bus.last_report().truncated,
        },
    });
    if transcript {
        output["transcript"] = serde_json::to_value(bus.transcript())?;
    }
    println!("{}", serde_json::to_string_pretty(&output)?);

    if !result.success {
        anyhow::bail!("workflow failed: {}", result.message);
    }
    Ok(())
}

async fn artifacts(config: &Config, show: Option<String>) -> anyhow::Result<()> {
    let store = ArtifactStore::new(config.artifact_dir.clone());
    match show {
        Some(name) => print!("{}", store.read(&name).await?),
        None => {
            for name in store.list().await? {
                println!("{name}");
            }
        }
    }
    Ok(())
}

async fn models(config: &Config) -> anyhow::Result<()> {
    let settings = ModelSettings::load(config).await?;
    let mut table = serde_json::Map::new();
    for model in settings.known_models() {
        table.insert(
            model.to_string(),
            serde_json::Value::Object(settings.resolve(model, None)),
        );
    }
    println!("{}", serde_json::to_string_pretty(&table)?);
    Ok(())
}
