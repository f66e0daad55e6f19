mod echo;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tandem_agent::{validate, ModelRegistry, Node, Runner, WorkflowDefinition};
use tandem_core::config::EngineConfig;
use tandem_core::types::RunEvent;
use tandem_tools::ToolRegistry;

use echo::EchoModel;

#[derive(Parser)]
#[command(name = "tandem", version, about = "Multi-agent workflow orchestrator")]
struct Cli {
    /// Path to engine config file
    #[arg(short, long, default_value = "tandem.toml", env = "TANDEM_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a workflow file and print its node tree
    Validate {
        /// Workflow TOML file
        workflow: PathBuf,
        /// Initial context entry (repeatable)
        #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_key_val)]
        set: Vec<(String, String)>,
    },
    /// Dry-run a workflow with an offline echo model
    Run {
        /// Workflow TOML file
        workflow: PathBuf,
        /// Initial context entry (repeatable)
        #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_key_val)]
        set: Vec<(String, String)>,
        /// Have the echo model call agent tools on its first turn
        #[arg(long)]
        probe_tools: bool,
        /// Print run events to stderr
        #[arg(long)]
        events: bool,
    },
    /// Show the effective engine configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tandem=info,warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Validate { workflow, set } => {
            let root = build_workflow(&workflow, false)?;
            let initial: BTreeMap<String, String> = set.into_iter().collect();
            let report = validate(&root, initial.keys().map(String::as_str))?;

            print!("{}", root.outline());
            for warning in &report.warnings {
                println!("warning: {}", warning);
            }
            if report.is_clean() {
                println!("ok");
            }
        }
        Commands::Run {
            workflow,
            set,
            probe_tools,
            events,
        } => {
            let root = build_workflow(&workflow, probe_tools)?;
            let initial: BTreeMap<String, String> = set.into_iter().collect();
            let runner = Runner::new(config);

            let printer = events.then(|| spawn_event_printer(&runner));
            let result = runner.run(&root, initial).await;
            if let Some(handle) = printer {
                handle.await.ok();
            }

            match result {
                Ok(output) => {
                    info!(run_id = %output.run_id, elapsed_ms = output.elapsed_ms, "Dry run complete");
                    println!("{}", serde_json::to_string_pretty(&output.final_context())?);
                }
                Err(report) => {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                    anyhow::bail!("run failed: {}", report);
                }
            }
        }
    }

    Ok(())
}

/// Load the engine config, falling back to defaults when the file is absent.
fn load_config(path: &Path) -> anyhow::Result<EngineConfig> {
    if path.exists() {
        Ok(EngineConfig::load(path)?)
    } else {
        warn!(path = %path.display(), "Config file not found, using defaults");
        Ok(EngineConfig::default())
    }
}

/// Parse a workflow and resolve every model name to the echo model.
fn build_workflow(path: &Path, probe_tools: bool) -> anyhow::Result<Node> {
    let definition = WorkflowDefinition::load(path)?;
    let models: Vec<&str> = definition.model_names().into_iter().collect();
    info!(workflow = %path.display(), models = ?models, "Models resolved to offline echo");

    let registry = ModelRegistry::new().with_fallback(Arc::new(EchoModel::new(probe_tools)));
    Ok(definition.build(&registry, &ToolRegistry::new())?)
}

fn spawn_event_printer(runner: &Runner) -> tokio::task::JoinHandle<()> {
    let mut rx = runner.event_bus().subscribe();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            match event {
                RunEvent::NodeStarted { node, kind, .. } => eprintln!("[{}: {} started]", node, kind),
                RunEvent::NodeCompleted { node, elapsed_ms, .. } => {
                    eprintln!("[{}: ok in {}ms]", node, elapsed_ms)
                }
                RunEvent::NodeFailed { node, error, .. } => eprintln!("[{}: FAILED] {}", node, error),
                RunEvent::ToolStart { node, tool, .. } => eprintln!("[{} -> tool: {}]", node, tool),
                RunEvent::ToolEnd { tool, result, .. } => {
                    let status = if result.is_error() { "ERROR" } else { "ok" };
                    eprintln!("[{}: {}]", tool, status)
                }
                RunEvent::BranchesMerged { node, keys } => {
                    eprintln!("[{}: merged {}]", node, keys.join(", "))
                }
                RunEvent::RunComplete { .. } => break,
                RunEvent::RunStarted { run_id } => eprintln!("[run {}]", run_id),
            }
        }
    })
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;
    if key.is_empty() {
        return Err(format!("empty key in '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}
