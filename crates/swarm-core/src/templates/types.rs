//! Behavior template types
//!
//! A template is the persona and execution parameters a worker runs with.
//! Template files hold a list of these under a top-level `templates` key.

use serde::{Deserialize, Serialize};

/// A named worker persona plus its execution parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorTemplate {
    /// Unique identifier used to address the template (e.g. "reviewer")
    pub id: String,

    /// Human-readable summary of what the template is for
    pub description: String,

    /// Persona instructions handed to the backend as its system prompt
    pub instructions: String,

    /// Model override; the backend default applies when unset
    #[serde(default)]
    pub model: Option<String>,

    /// Maximum tokens for the response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u64,

    /// Sampling temperature
    #[serde(default)]
    pub temperature: Option<f32>,

    /// Per-task timeout override in milliseconds
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

fn default_max_tokens() -> u64 {
    4096
}

impl BehaviorTemplate {
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        instructions: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            instructions: instructions.into(),
            model: None,
            max_tokens: default_max_tokens(),
            temperature: None,
            timeout_ms: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// Top-level shape of a template file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateFile {
    #[serde(default)]
    pub templates: Vec<BehaviorTemplate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_yaml_parsing() {
        let yaml = r#"
templates:
  - id: auditor
    description: Security audits
    instructions: You audit code for vulnerabilities.
    model: claude-opus-4
    temperature: 0.2
    timeout_ms: 60000
  - id: terse
    description: Short answers
    instructions: Answer in one sentence.
"#;
        let file: TemplateFile = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(file.templates.len(), 2);

        let auditor = &file.templates[0];
        assert_eq!(auditor.id, "auditor");
        assert_eq!(auditor.model.as_deref(), Some("claude-opus-4"));
        assert_eq!(auditor.temperature, Some(0.2));
        assert_eq!(auditor.timeout_ms, Some(60_000));

        let terse = &file.templates[1];
        assert_eq!(terse.max_tokens, 4096);
        assert!(terse.model.is_none());
    }

    #[test]
    fn test_template_toml_parsing() {
        let toml = r#"
[[templates]]
id = "planner"
description = "Breaks work down"
instructions = "Produce a numbered plan."
max_tokens = 1024
"#;
        let file: TemplateFile = toml::from_str(toml).unwrap();
        assert_eq!(file.templates.len(), 1);
        assert_eq!(file.templates[0].max_tokens, 1024);
    }

    #[test]
    fn test_template_builder() {
        let template = BehaviorTemplate::new("a", "b", "c")
            .with_model("m")
            .with_max_tokens(10)
            .with_temperature(0.5)
            .with_timeout_ms(100);

        assert_eq!(template.model.as_deref(), Some("m"));
        assert_eq!(template.max_tokens, 10);
        assert_eq!(template.temperature, Some(0.5));
        assert_eq!(template.timeout_ms, Some(100));
    }
}
