//! Worker and task types
//!
//! Defines the core types for task delegation:
//! - TaskSpec: one submitted task descriptor
//! - TaskResult: the outcome of one worker
//! - WorkerId / WorkerStatus: identity and lifecycle of a worker

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Unique identifier for a worker
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub String);

impl WorkerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    #[default]
    Spawned,
    Running,
    Completed,
    Failed,
    TimedOut,
}

impl WorkerStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::TimedOut)
    }
}

/// Task to be delegated to a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Behavior template the worker runs with
    pub template_id: String,
    /// Task description/instruction
    pub task: String,
    /// Free-form input the task operates on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    /// Structured context handed to the backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<JsonValue>,
    /// Per-task timeout override in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Confidence used by `rank` aggregation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl TaskSpec {
    pub fn new(template_id: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            template_id: template_id.into(),
            task: task.into(),
            input: None,
            context: None,
            timeout_ms: None,
            confidence: None,
        }
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn with_context(mut self, context: JsonValue) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

/// Result from worker execution
///
/// Exactly one of `output` / `error_message` is set; build results through
/// [`TaskResult::success`] and [`TaskResult::failure`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub success: bool,
    pub template_id: String,
    pub task: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Execution time in milliseconds
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<WorkerId>,
}

impl TaskResult {
    /// Create a successful result
    pub fn success(
        template_id: impl Into<String>,
        task: impl Into<String>,
        output: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            success: true,
            template_id: template_id.into(),
            task: task.into(),
            output: Some(output.into()),
            error_message: None,
            duration_ms,
            confidence: None,
            worker_id: None,
        }
    }

    /// Create a failed result
    pub fn failure(
        template_id: impl Into<String>,
        task: impl Into<String>,
        error: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            success: false,
            template_id: template_id.into(),
            task: task.into(),
            output: None,
            error_message: Some(error.into()),
            duration_ms,
            confidence: None,
            worker_id: None,
        }
    }

    pub fn with_confidence(mut self, confidence: Option<f64>) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_worker(mut self, worker_id: WorkerId) -> Self {
        self.worker_id = Some(worker_id);
        self
    }

    /// The output when successful, otherwise the error message
    pub fn text(&self) -> &str {
        self.output
            .as_deref()
            .or(self.error_message.as_deref())
            .unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_worker_id_default() {
        let id1 = WorkerId::default();
        let id2 = WorkerId::default();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_worker_status_finished() {
        assert!(!WorkerStatus::Spawned.is_finished());
        assert!(!WorkerStatus::Running.is_finished());
        assert!(WorkerStatus::Completed.is_finished());
        assert!(WorkerStatus::TimedOut.is_finished());
    }

    #[test]
    fn test_task_spec_builder() {
        let spec = TaskSpec::new("coder", "Write a parser")
            .with_input("grammar.txt")
            .with_context(json!({"lang": "rust"}))
            .with_timeout_ms(5_000)
            .with_confidence(0.9);

        assert_eq!(spec.template_id, "coder");
        assert_eq!(spec.input.as_deref(), Some("grammar.txt"));
        assert_eq!(spec.timeout_ms, Some(5_000));
        assert_eq!(spec.confidence, Some(0.9));
    }

    #[test]
    fn test_task_spec_minimal_json() {
        let spec: TaskSpec =
            serde_json::from_str(r#"{"template_id": "writer", "task": "t"}"#).unwrap();
        assert_eq!(spec, TaskSpec::new("writer", "t"));
    }

    #[test]
    fn test_task_result_success() {
        let result = TaskResult::success("coder", "t", "done", 15);
        assert!(result.success);
        assert_eq!(result.output.as_deref(), Some("done"));
        assert!(result.error_message.is_none());
        assert_eq!(result.text(), "done");
    }

    #[test]
    fn test_task_result_failure() {
        let result = TaskResult::failure("coder", "t", "boom", 3);
        assert!(!result.success);
        assert!(result.output.is_none());
        assert_eq!(result.error_message.as_deref(), Some("boom"));
        assert_eq!(result.text(), "boom");
    }

    #[test]
    fn test_task_result_json_omits_unset() {
        let json = serde_json::to_value(TaskResult::success("a", "t", "o", 1)).unwrap();
        assert!(json.get("error_message").is_none());
        assert!(json.get("confidence").is_none());
    }
}
