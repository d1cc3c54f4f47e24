//! Template file loading
//!
//! Reads extra behavior templates from a YAML or TOML file.

use std::path::Path;
use tokio::fs;

use super::types::{BehaviorTemplate, TemplateFile};
use crate::{Error, Result};

/// Load all templates from a single file
pub async fn load_templates(path: &Path) -> Result<Vec<BehaviorTemplate>> {
    let content = fs::read_to_string(path).await.map_err(|e| {
        Error::Config(format!(
            "Failed to read template file {}: {}",
            path.display(),
            e
        ))
    })?;

    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let file = parse_templates(&content, extension)?;

    for template in &file.templates {
        if template.id.trim().is_empty() {
            return Err(Error::Config(format!(
                "Template with empty id in {}",
                path.display()
            )));
        }
        if template.timeout_ms == Some(0) {
            return Err(Error::Config(format!(
                "Template {} in {} has a zero timeout_ms",
                template.id,
                path.display()
            )));
        }
    }

    tracing::info!(
        path = %path.display(),
        count = file.templates.len(),
        "Loaded templates"
    );

    Ok(file.templates)
}

fn parse_templates(content: &str, extension: &str) -> Result<TemplateFile> {
    match extension {
        "yaml" | "yml" => serde_yaml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse YAML template file: {}", e))),
        "toml" => toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse TOML template file: {}", e))),
        _ => Err(Error::Config(format!(
            "Unsupported template file format: {}",
            extension
        ))),
    }
}
