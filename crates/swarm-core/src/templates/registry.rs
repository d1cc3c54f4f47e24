//! Template registry
//!
//! Read-only lookup from template id to [`BehaviorTemplate`]. Built once at
//! startup and shared behind `Arc`; there is no registration after
//! construction.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::types::BehaviorTemplate;
use crate::{Error, Result};

/// Template used by `synthesize` aggregation
pub const SYNTHESIZER_TEMPLATE_ID: &str = "synthesizer";

/// Immutable catalog of behavior templates
#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    templates: HashMap<String, Arc<BehaviorTemplate>>,
}

impl TemplateRegistry {
    /// Build a registry from templates; later entries replace earlier ones with the same id
    pub fn from_templates(templates: impl IntoIterator<Item = BehaviorTemplate>) -> Self {
        let mut map = HashMap::new();
        for template in templates {
            if map.contains_key(&template.id) {
                debug!(template_id = %template.id, "Overriding template");
            }
            map.insert(template.id.clone(), Arc::new(template));
        }
        info!("Template registry built with {} templates", map.len());
        Self { templates: map }
    }

    /// The built-in catalog
    pub fn builtin() -> Self {
        Self::from_templates(builtin_templates())
    }

    /// Built-ins, overridden and extended by `extra`
    pub fn with_overrides(extra: impl IntoIterator<Item = BehaviorTemplate>) -> Self {
        Self::from_templates(builtin_templates().into_iter().chain(extra))
    }

    /// Look up a template by id
    pub fn resolve(&self, template_id: &str) -> Result<Arc<BehaviorTemplate>> {
        self.templates
            .get(template_id)
            .cloned()
            .ok_or_else(|| Error::UnknownTemplate(template_id.to_string()))
    }

    pub fn contains(&self, template_id: &str) -> bool {
        self.templates.contains_key(template_id)
    }

    /// All template ids, sorted
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.templates.keys().map(|s| s.as_str()).collect();
        ids.sort_unstable();
        ids
    }

    /// All templates, sorted by id
    pub fn all(&self) -> Vec<Arc<BehaviorTemplate>> {
        let mut all: Vec<_> = self.templates.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

fn builtin_templates() -> Vec<BehaviorTemplate> {
    vec![
        BehaviorTemplate::new(
            "researcher",
            "Gathers facts and sources on a topic",
            "You are a research specialist. Investigate the task thoroughly, \
             separate established facts from speculation, and cite where each \
             claim comes from.",
        ),
        BehaviorTemplate::new(
            "coder",
            "Writes and modifies code",
            "You are a senior software engineer. Produce working, idiomatic code \
             for the task and explain any non-obvious decisions briefly.",
        )
        .with_temperature(0.2),
        BehaviorTemplate::new(
            "reviewer",
            "Reviews code or documents for defects",
            "You are a meticulous reviewer. List concrete problems with their \
             location and severity, then suggest fixes. Do not rewrite what is \
             already correct.",
        )
        .with_temperature(0.1),
        BehaviorTemplate::new(
            "writer",
            "Drafts clear prose",
            "You are a technical writer. Write clear, well-structured prose for \
             the intended audience.",
        )
        .with_temperature(0.7),
        BehaviorTemplate::new(
            "analyst",
            "Analyzes data and trade-offs",
            "You are an analyst. Break the problem into factors, weigh the \
             trade-offs, and finish with a recommendation.",
        ),
        BehaviorTemplate::new(
            SYNTHESIZER_TEMPLATE_ID,
            "Merges several worker outputs into one answer",
            "You merge the outputs of several independent workers into a single \
             coherent answer. Keep points the workers agree on, call out where \
             they disagree, and do not invent content none of them produced.",
        )
        .with_temperature(0.3),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_resolve() {
        let registry = TemplateRegistry::builtin();
        let coder = registry.resolve("coder").unwrap();
        assert_eq!(coder.id, "coder");
        assert!(registry.contains(SYNTHESIZER_TEMPLATE_ID));
    }

    #[test]
    fn test_unknown_template() {
        let registry = TemplateRegistry::builtin();
        let err = registry.resolve("nope").unwrap_err();
        assert!(matches!(err, Error::UnknownTemplate(id) if id == "nope"));
    }

    #[test]
    fn test_ids_sorted() {
        let registry = TemplateRegistry::builtin();
        let ids = registry.ids();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
        assert_eq!(ids.len(), registry.len());
    }

    #[test]
    fn test_overrides_replace_builtins() {
        let registry = TemplateRegistry::with_overrides(vec![
            BehaviorTemplate::new("coder", "Custom coder", "Only write Rust."),
            BehaviorTemplate::new("auditor", "Audits", "Find vulnerabilities."),
        ]);

        assert_eq!(registry.resolve("coder").unwrap().description, "Custom coder");
        assert!(registry.contains("auditor"));
        assert!(registry.contains("researcher"));
    }

    #[test]
    fn test_empty_registry() {
        let registry = TemplateRegistry::default();
        assert!(registry.is_empty());
        assert!(registry.resolve("coder").is_err());
    }
}
