//! Configuration management
//!
//! Settings are resolved in this order:
//! 1. Environment variables
//! 2. `swarm.toml` configuration file
//! 3. Default values
//!
//! `${VAR_NAME}` references inside the configuration file are expanded from
//! the environment before parsing.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

use crate::agents::AggregateMode;
use crate::{Error, Result};

/// Default configuration file name looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "swarm.toml";

/// LLM Provider type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// Anthropic Messages API
    #[default]
    Claude,
    /// OpenAI-compatible chat completions API
    OpenAi,
}

impl LlmProvider {
    fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "openai" | "glm" | "zai" | "minimax" => Self::OpenAi,
            _ => Self::Claude,
        }
    }
}

/// LLM configuration, used when the invoker kind is `llm`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// API key
    pub api_key: String,

    /// Default model, used when a template does not name one
    #[serde(default = "default_model")]
    pub model: String,

    /// API provider
    #[serde(default)]
    pub provider: LlmProvider,

    /// Base URL (optional, for custom endpoints)
    pub base_url: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            provider: LlmProvider::Claude,
            base_url: None,
        }
    }
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

/// Which task execution backend to use
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum InvokerKind {
    /// Deterministic canned responses, no external calls
    #[default]
    Offline,
    /// Text generation over HTTP
    Llm,
    /// A shell command per task
    Command,
}

impl std::str::FromStr for InvokerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "offline" => Ok(Self::Offline),
            "llm" => Ok(Self::Llm),
            "command" => Ok(Self::Command),
            other => Err(Error::Config(format!("Unknown invoker kind: {}", other))),
        }
    }
}

/// Orchestrator limits and defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum number of concurrently active workers
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Per-task timeout when neither the request nor the template sets one
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Aggregation mode used when the caller does not pick one
    #[serde(default)]
    pub default_mode: AggregateMode,

    /// Preview length (in characters) for `diff` aggregation
    #[serde(default = "default_preview_len")]
    pub preview_len: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            default_timeout_ms: default_timeout_ms(),
            default_mode: AggregateMode::default(),
            preview_len: default_preview_len(),
        }
    }
}

fn default_max_parallel() -> usize {
    4
}

fn default_timeout_ms() -> u64 {
    120_000
}

fn default_preview_len() -> usize {
    500
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to SQLite database file
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "data/swarm.db".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvokerConfig {
    /// Backend that executes worker tasks
    #[serde(default)]
    pub kind: InvokerKind,

    /// Backend used by `synthesize` aggregation
    #[serde(default)]
    pub synthesizer: InvokerKind,

    /// Shell command for the `command` backend
    pub command: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplatesConfig {
    /// YAML or TOML file with extra behavior templates
    pub path: Option<String>,
}

/// Main configuration for swarm
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub invoker: InvokerConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub templates: TemplatesConfig,
}

impl Config {
    /// Expand `${VAR_NAME}` references from the environment.
    ///
    /// Unset variables expand to an empty string.
    fn expand_env_vars(value: &str) -> String {
        let mut result = String::with_capacity(value.len());
        let mut chars = value.chars().peekable();

        while let Some(c) = chars.next() {
            if c == '$' && chars.peek() == Some(&'{') {
                chars.next();

                let mut var_name = String::new();
                while let Some(c) = chars.next_if(|c| *c != '}') {
                    var_name.push(c);
                }
                chars.next_if_eq(&'}');

                if let Ok(env_value) = std::env::var(&var_name) {
                    result.push_str(&env_value);
                }
            } else {
                result.push(c);
            }
        }

        result
    }

    /// Load configuration from a TOML file, then apply environment overrides
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let toml_content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let mut cfg = Self::from_toml_str(&toml_content)?;
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse configuration from TOML text (after `${VAR}` expansion)
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let expanded = Self::expand_env_vars(content);
        let toml: TomlConfig = toml::from_str(&expanded)
            .map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e)))?;
        Self::from_toml_config(toml)
    }

    /// Load from `swarm.toml` when present, otherwise from the environment only
    pub fn load() -> Result<Self> {
        if Path::new(DEFAULT_CONFIG_FILE).exists() {
            return Self::from_toml_file(DEFAULT_CONFIG_FILE);
        }

        Self::from_env()
    }

    /// Defaults plus environment overrides
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_toml_config(toml: TomlConfig) -> Result<Self> {
        let orch = toml.orchestrator.unwrap_or_default();
        let default_mode = match orch.default_mode {
            Some(mode) => mode.parse()?,
            None => AggregateMode::default(),
        };
        let orchestrator = OrchestratorConfig {
            max_parallel: orch.max_parallel.unwrap_or_else(default_max_parallel),
            default_timeout_ms: orch.default_timeout_ms.unwrap_or_else(default_timeout_ms),
            default_mode,
            preview_len: orch.preview_len.unwrap_or_else(default_preview_len),
        };

        let store = toml.store.unwrap_or_default();
        let store = StoreConfig {
            db_path: store.db_path.unwrap_or_else(default_db_path),
        };

        let invoker = toml.invoker.unwrap_or_default();
        let invoker = InvokerConfig {
            kind: match invoker.kind {
                Some(kind) => kind.parse()?,
                None => InvokerKind::default(),
            },
            synthesizer: match invoker.synthesizer {
                Some(kind) => kind.parse()?,
                None => InvokerKind::default(),
            },
            command: invoker.command,
        };

        let llm = toml.llm.unwrap_or_default();
        let llm = LlmConfig {
            api_key: llm.api_key.unwrap_or_default(),
            model: llm.model.unwrap_or_else(default_model),
            provider: LlmProvider::parse(&llm.provider.unwrap_or_default()),
            base_url: llm.base_url,
        };

        let templates = TemplatesConfig {
            path: toml.templates.unwrap_or_default().path,
        };

        Ok(Config {
            orchestrator,
            store,
            invoker,
            llm,
            templates,
        })
    }

    /// Override settings from environment variables
    fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("SWARM_MAX_PARALLEL") {
            match value.parse() {
                Ok(n) => self.orchestrator.max_parallel = n,
                Err(_) => warn!(value = %value, "Ignoring invalid SWARM_MAX_PARALLEL"),
            }
        }
        if let Ok(value) = std::env::var("SWARM_TIMEOUT_MS") {
            match value.parse() {
                Ok(ms) => self.orchestrator.default_timeout_ms = ms,
                Err(_) => warn!(value = %value, "Ignoring invalid SWARM_TIMEOUT_MS"),
            }
        }
        if let Ok(value) = std::env::var("SWARM_MODE") {
            match value.parse() {
                Ok(mode) => self.orchestrator.default_mode = mode,
                Err(_) => warn!(value = %value, "Ignoring invalid SWARM_MODE"),
            }
        }
        if let Ok(path) = std::env::var("SWARM_DB_PATH") {
            if !path.is_empty() {
                self.store.db_path = path;
            }
        }
        if let Ok(value) = std::env::var("SWARM_INVOKER") {
            match value.parse() {
                Ok(kind) => self.invoker.kind = kind,
                Err(_) => warn!(value = %value, "Ignoring invalid SWARM_INVOKER"),
            }
        }
        if let Ok(value) = std::env::var("SWARM_SYNTHESIZER") {
            match value.parse() {
                Ok(kind) => self.invoker.synthesizer = kind,
                Err(_) => warn!(value = %value, "Ignoring invalid SWARM_SYNTHESIZER"),
            }
        }
        if let Ok(command) = std::env::var("SWARM_COMMAND") {
            if !command.is_empty() {
                self.invoker.command = Some(command);
            }
        }
        if let Ok(path) = std::env::var("SWARM_TEMPLATES_PATH") {
            if !path.is_empty() {
                self.templates.path = Some(path);
            }
        }

        if let Ok(api_key) = std::env::var("LLM_API_KEY") {
            self.llm.api_key = api_key;
        }
        if let Ok(model) = std::env::var("LLM_MODEL") {
            if !model.is_empty() {
                self.llm.model = model;
            }
        }
        if let Ok(provider) = std::env::var("LLM_PROVIDER") {
            if !provider.is_empty() {
                self.llm.provider = LlmProvider::parse(&provider);
            }
        }
        if let Ok(base_url) = std::env::var("LLM_BASE_URL") {
            if !base_url.is_empty() {
                self.llm.base_url = Some(base_url);
            }
        }
    }

    /// Reject settings the orchestrator cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.orchestrator.max_parallel == 0 {
            return Err(Error::Config("max_parallel must be at least 1".to_string()));
        }
        if self.orchestrator.default_timeout_ms == 0 {
            return Err(Error::Config("default_timeout_ms must be positive".to_string()));
        }
        let uses_llm =
            self.invoker.kind == InvokerKind::Llm || self.invoker.synthesizer == InvokerKind::Llm;
        if uses_llm && self.llm.api_key.is_empty() {
            return Err(Error::Config(
                "llm invoker selected but LLM_API_KEY is not set".to_string(),
            ));
        }
        let uses_command = self.invoker.kind == InvokerKind::Command
            || self.invoker.synthesizer == InvokerKind::Command;
        if uses_command && self.invoker.command.is_none() {
            return Err(Error::Config(
                "command invoker selected but no command configured".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// TOML file structures
// ============================================================================

#[derive(Debug, Deserialize)]
struct TomlConfig {
    orchestrator: Option<TomlOrchestratorConfig>,
    store: Option<TomlStoreConfig>,
    invoker: Option<TomlInvokerConfig>,
    llm: Option<TomlLlmConfig>,
    templates: Option<TomlTemplatesConfig>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlOrchestratorConfig {
    max_parallel: Option<usize>,
    default_timeout_ms: Option<u64>,
    default_mode: Option<String>,
    preview_len: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlStoreConfig {
    db_path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlInvokerConfig {
    kind: Option<String>,
    synthesizer: Option<String>,
    command: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlLlmConfig {
    /// "claude" or "openai"
    provider: Option<String>,
    model: Option<String>,
    api_key: Option<String>,
    base_url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlTemplatesConfig {
    path: Option<String>,
}
