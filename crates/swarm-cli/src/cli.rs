//! Command-line definition for `swarm`

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use swarm_core::{AggregateMode, InvokerKind, TaskSpec};

#[derive(Parser, Debug)]
#[command(name = "swarm")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(
    about = "Delegate tasks to named worker templates and aggregate the results",
    long_about = None
)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to a swarm.toml (default: ./swarm.toml if present)
    #[arg(short, long, global = true, env = "SWARM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the session database path
    #[arg(long, global = true)]
    pub db: Option<String>,

    /// Override the task backend (offline, llm, command)
    #[arg(long, global = true)]
    pub invoker: Option<InvokerKind>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Load `.env` (or `env_file`) first, so env-backed flags can come from it
    pub fn parse_with_dotenv<I, T>(env_file: Option<&Path>, args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        // A missing .env is not an error
        let _ = match env_file {
            Some(path) => dotenvy::from_path(path),
            None => dotenvy::dotenv().map(drop),
        };
        Self::try_parse_from(args)
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one task on one template
    Delegate {
        /// Template id (see `swarm templates`)
        template: String,

        /// Task instruction
        task: String,

        /// Input the task operates on
        #[arg(short, long)]
        input: Option<String>,

        /// JSON context handed to the backend
        #[arg(long)]
        context: Option<String>,

        /// Timeout for this task in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Confidence recorded on the result
        #[arg(long)]
        confidence: Option<f64>,
    },

    /// Run several tasks concurrently and aggregate the results
    Parallel {
        /// Task as `template:instruction`; repeat for more tasks
        #[arg(short, long = "task", value_name = "TEMPLATE:TASK")]
        tasks: Vec<String>,

        /// JSON file with an array of task objects
        #[arg(long)]
        tasks_file: Option<PathBuf>,

        /// Input shared by every task that has none of its own
        #[arg(short, long)]
        input: Option<String>,

        /// Aggregation mode (concatenate, synthesize, vote, rank, diff)
        #[arg(short, long)]
        mode: Option<AggregateMode>,
    },

    /// Inspect recorded sessions
    Sessions {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// List available templates
    Templates,
}

#[derive(Subcommand, Debug)]
pub enum SessionAction {
    /// List sessions, newest first
    List {
        /// Show at most this many sessions
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show one session
    Get {
        /// Session id
        id: String,
    },
}

/// Parse `template:instruction`
pub fn parse_task_arg(arg: &str) -> Result<TaskSpec> {
    let Some((template, task)) = arg.split_once(':') else {
        bail!("task must look like TEMPLATE:TASK, got {:?}", arg);
    };

    let (template, task) = (template.trim(), task.trim());
    if template.is_empty() || task.is_empty() {
        bail!("task must look like TEMPLATE:TASK, got {:?}", arg);
    }

    Ok(TaskSpec::new(template, task))
}

/// Read a JSON array of task objects
pub async fn read_tasks_file(path: &Path) -> Result<Vec<TaskSpec>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read tasks file {}", path.display()))?;

    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse tasks file {}", path.display()))
}

/// Tasks from `--tasks-file` first, then each `--task`
pub async fn collect_tasks(args: &[String], file: Option<&Path>) -> Result<Vec<TaskSpec>> {
    let mut tasks = match file {
        Some(path) => read_tasks_file(path).await?,
        None => Vec::new(),
    };

    for arg in args {
        tasks.push(parse_task_arg(arg)?);
    }

    Ok(tasks)
}
