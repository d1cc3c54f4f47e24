//! Deterministic offline backend
//!
//! Produces canned output without any external call, so the whole
//! orchestration path runs in tests and on machines with no backend.
//! Synthesis requests (context carrying a `results` array) get a structured
//! enumeration of each successful result.

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use super::Invoker;
use crate::Result;
use crate::templates::BehaviorTemplate;

/// Characters of each output kept in the synthesis enumeration
pub const SYNTHESIS_PREFIX_LEN: usize = 200;

#[derive(Debug, Clone, Default)]
pub struct OfflineInvoker;

impl OfflineInvoker {
    pub fn new() -> Self {
        Self
    }

    fn synthesize(results: &[JsonValue]) -> String {
        let mut out = format!("Synthesis of {} successful results:", results.len());

        for (i, result) in results.iter().enumerate() {
            let template_id = result
                .get("template_id")
                .and_then(JsonValue::as_str)
                .unwrap_or("unknown");
            let duration_ms = result
                .get("duration_ms")
                .and_then(JsonValue::as_u64)
                .unwrap_or(0);
            let output = result.get("output").and_then(JsonValue::as_str).unwrap_or("");

            out.push_str(&format!(
                "\n{}. [{}] ({}ms): {}",
                i + 1,
                template_id,
                duration_ms,
                prefix(output, SYNTHESIS_PREFIX_LEN)
            ));
        }

        out
    }
}

/// First `len` characters of `text`, with an ellipsis when cut
pub(crate) fn prefix(text: &str, len: usize) -> String {
    match text.char_indices().nth(len) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[async_trait]
impl Invoker for OfflineInvoker {
    fn name(&self) -> &str {
        "offline"
    }

    async fn invoke(
        &self,
        template: &BehaviorTemplate,
        task: &str,
        input: Option<&str>,
        context: Option<&JsonValue>,
    ) -> Result<String> {
        if let Some(results) = context
            .and_then(|c| c.get("results"))
            .and_then(JsonValue::as_array)
        {
            return Ok(Self::synthesize(results));
        }

        let mut out = format!("[{}] {}", template.id, task);
        if let Some(input) = input.filter(|i| !i.is_empty()) {
            out.push_str(&format!("\n\nInput: {}", input));
        }
        Ok(out)
    }
}
