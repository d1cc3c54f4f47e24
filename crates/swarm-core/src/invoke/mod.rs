//! Task execution backends
//!
//! Workers never talk to a backend directly; they go through the [`Invoker`]
//! trait. Three implementations ship with the crate:
//!
//! - [`LlmInvoker`]: Anthropic or OpenAI-compatible text generation over HTTP
//! - [`CommandInvoker`]: one shell command per task
//! - [`OfflineInvoker`]: deterministic canned output, no external calls

mod command;
mod llm;
mod offline;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::sync::Arc;

use crate::config::{Config, InvokerKind};
use crate::templates::BehaviorTemplate;
use crate::{Error, Result};

pub use command::CommandInvoker;
pub use llm::LlmInvoker;
pub use offline::{OfflineInvoker, SYNTHESIS_PREFIX_LEN};
pub(crate) use offline::prefix;

/// Executes one task against one behavior template
#[async_trait]
pub trait Invoker: Send + Sync + 'static {
    /// Short backend name, recorded in logs and synthesis details
    fn name(&self) -> &str;

    /// Run `task` with the template's persona and return the produced text
    async fn invoke(
        &self,
        template: &BehaviorTemplate,
        task: &str,
        input: Option<&str>,
        context: Option<&JsonValue>,
    ) -> Result<String>;
}

/// Build the backend selected by `kind`
pub fn build_invoker(kind: InvokerKind, config: &Config) -> Result<Arc<dyn Invoker>> {
    match kind {
        InvokerKind::Offline => Ok(Arc::new(OfflineInvoker::new())),
        InvokerKind::Llm => Ok(Arc::new(LlmInvoker::new(&config.llm)?)),
        InvokerKind::Command => {
            let command = config.invoker.command.clone().ok_or_else(|| {
                Error::Config("command invoker selected but no command configured".to_string())
            })?;
            Ok(Arc::new(CommandInvoker::new(command)))
        }
    }
}

/// Render the user-facing prompt for a task
pub(crate) fn render_prompt(
    task: &str,
    input: Option<&str>,
    context: Option<&JsonValue>,
) -> String {
    let mut prompt = task.to_string();

    if let Some(input) = input.filter(|i| !i.is_empty()) {
        prompt.push_str("\n\n## Input\n");
        prompt.push_str(input);
    }

    if let Some(context) = context.filter(|c| !c.is_null()) {
        let rendered =
            serde_json::to_string_pretty(context).unwrap_or_else(|_| context.to_string());
        prompt.push_str("\n\n## Context\n```json\n");
        prompt.push_str(&rendered);
        prompt.push_str("\n```");
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_prompt_task_only() {
        assert_eq!(render_prompt("Do it", None, None), "Do it");
        assert_eq!(render_prompt("Do it", Some(""), Some(&JsonValue::Null)), "Do it");
    }

    #[test]
    fn test_render_prompt_with_input_and_context() {
        let prompt = render_prompt("Review", Some("fn main() {}"), Some(&json!({"lang": "rust"})));
        assert!(prompt.starts_with("Review"));
        assert!(prompt.contains("## Input\nfn main() {}"));
        assert!(prompt.contains("\"lang\": \"rust\""));
    }

    #[test]
    fn test_build_offline_invoker() {
        let invoker = build_invoker(InvokerKind::Offline, &Config::default()).unwrap();
        assert_eq!(invoker.name(), "offline");
    }

    #[test]
    fn test_build_command_invoker_requires_command() {
        let result = build_invoker(InvokerKind::Command, &Config::default());
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
