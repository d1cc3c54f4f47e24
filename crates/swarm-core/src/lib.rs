//! swarm-core: multi-agent task delegation
//!
//! Named behavior templates, a bounded worker pool, durable sessions, and
//! result aggregation behind a single orchestrator.

pub mod agents;
pub mod config;
pub mod error;
pub mod invoke;
pub mod session;
pub mod templates;

pub use agents::{
    AggregateMode, AggregateResult, Orchestrator, ParallelDelegation, ResultAggregator,
    SingleDelegation, TaskResult, TaskSpec, WorkerPool,
};
pub use config::{Config, InvokerKind, LlmConfig, LlmProvider};
pub use error::{Error, ErrorKind, Result};
pub use invoke::{CommandInvoker, Invoker, LlmInvoker, OfflineInvoker};
pub use session::{Session, SessionBackend, SessionStatus, SessionStore, SessionUpdate};
pub use templates::{BehaviorTemplate, TemplateRegistry};
