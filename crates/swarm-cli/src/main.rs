//! swarm: multi-agent task delegation from the command line
//!
//! Usage:
//!   swarm delegate <TEMPLATE> <TASK>          - Run one task
//!   swarm parallel -t coder:a -t reviewer:b   - Run tasks concurrently and aggregate
//!   swarm sessions list | get <ID>            - Inspect recorded sessions
//!   swarm templates                           - List available templates
//!
//! Results are printed as JSON on stdout; logs go to stderr.

mod cli;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;
use std::process::ExitCode;
use swarm_core::{Config, Orchestrator, TaskSpec};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands, SessionAction, collect_tasks};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::parse_with_dotenv(None, std::env::args_os()) {
        Ok(cli) => cli,
        Err(e) => e.exit(),
    };

    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            let kind = e
                .downcast_ref::<swarm_core::Error>()
                .map(|core| format!("{:?}", core.kind()));
            // Stdout stays machine-readable even on failure
            let _ = print_json(&json!({ "error": format!("{:#}", e), "kind": kind }));
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_toml_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load().context("Failed to load configuration")?,
    };

    if let Some(db) = &cli.db {
        config.store.db_path = db.clone();
    }
    if let Some(kind) = cli.invoker {
        config.invoker.kind = kind;
    }

    Ok(config)
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    let orchestrator = Orchestrator::from_config(&config).await?;

    match cli.command {
        Commands::Delegate {
            template,
            task,
            input,
            context,
            timeout_ms,
            confidence,
        } => {
            let mut spec = TaskSpec::new(template, task);
            spec.input = input;
            spec.timeout_ms = timeout_ms;
            spec.confidence = confidence;
            if let Some(raw) = context {
                spec.context =
                    Some(serde_json::from_str(&raw).context("--context must be valid JSON")?);
            }

            let outcome = orchestrator.delegate_single(spec).await?;
            print_json(&outcome)
        }
        Commands::Parallel {
            tasks,
            tasks_file,
            input,
            mode,
        } => {
            let tasks = collect_tasks(&tasks, tasks_file.as_deref()).await?;
            let outcome = orchestrator.delegate_parallel(tasks, input, mode).await?;
            print_json(&outcome)
        }
        Commands::Sessions { action } => match action {
            SessionAction::List { limit } => {
                let mut sessions = orchestrator.list_sessions()?;
                if let Some(limit) = limit {
                    sessions.truncate(limit);
                }
                print_json(&sessions)
            }
            SessionAction::Get { id } => print_json(&orchestrator.get_session(&id)?),
        },
        Commands::Templates => {
            let templates = orchestrator.templates();
            let listing: Vec<&swarm_core::BehaviorTemplate> =
                templates.iter().map(|t| t.as_ref()).collect();
            print_json(&listing)
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", rendered);
    Ok(())
}
