//! Session types

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;
use crate::agents::{AggregateResult, TaskResult, TaskSpec};

/// Lifecycle of an orchestration run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(Error::Store(format!("Unknown session status: {}", other))),
        }
    }
}

/// One orchestration run and everything it produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier (UUIDv7, so ids sort by creation time)
    pub id: String,
    pub name: String,
    pub status: SessionStatus,
    /// Tasks in submission order
    pub tasks: Vec<TaskSpec>,
    /// Results index-aligned with `tasks` once the run is terminal
    pub results: Vec<TaskResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate: Option<AggregateResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create a pending session for `tasks`
    pub fn new(name: impl Into<String>, tasks: Vec<TaskSpec>) -> Self {
        let created = now();
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            name: name.into(),
            status: SessionStatus::Pending,
            tasks,
            results: Vec::new(),
            aggregate: None,
            error: None,
            created_at: created,
            updated_at: created,
        }
    }

    /// Shallow-merge `update` into this session; `id` and `created_at` never change
    pub fn apply(&mut self, update: SessionUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(results) = update.results {
            self.results = results;
        }
        if let Some(aggregate) = update.aggregate {
            self.aggregate = Some(aggregate);
        }
        if let Some(error) = update.error {
            self.error = Some(error);
        }
        self.updated_at = now();
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Current time at the precision sessions are stored with
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Partial update for a session; unset fields are left as they are
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionUpdate {
    pub status: Option<SessionStatus>,
    pub results: Option<Vec<TaskResult>>,
    pub aggregate: Option<AggregateResult>,
    pub error: Option<String>,
}

impl SessionUpdate {
    pub fn status(status: SessionStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn running() -> Self {
        Self::status(SessionStatus::Running)
    }

    pub fn completed(results: Vec<TaskResult>, aggregate: Option<AggregateResult>) -> Self {
        Self {
            status: Some(SessionStatus::Completed),
            results: Some(results),
            aggregate,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(SessionStatus::Failed),
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_results(mut self, results: Vec<TaskResult>) -> Self {
        self.results = Some(results);
        self
    }
}
