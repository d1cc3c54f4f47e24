//! Delegation and Orchestration
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Orchestrator                           │
//! │  - Validates templates and capacity                          │
//! │  - Records the run as a Session                              │
//! └───────┬──────────────────────────────────────────┬──────────┘
//!         │                                          │
//!         ▼                                          ▼
//! ┌────────────────────────────────┐   ┌────────────────────────┐
//! │          WorkerPool             │   │      SessionStore      │
//! │  ┌────────┐ ┌────────┐ ┌─────┐ │   │  (SQLite)              │
//! │  │Worker 1│ │Worker 2│ │ ... │ │   └────────────────────────┘
//! │  └───┬────┘ └───┬────┘ └──┬──┘ │
//! └──────┼──────────┼─────────┼────┘
//!        ▼          ▼         ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ResultAggregator                        │
//! │  concatenate | synthesize | vote | rank | diff               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use swarm_core::agents::{AggregateMode, Orchestrator, TaskSpec};
//! use swarm_core::Config;
//!
//! let orchestrator = Orchestrator::from_config(&Config::load()?).await?;
//!
//! let outcome = orchestrator
//!     .delegate_parallel(
//!         vec![
//!             TaskSpec::new("coder", "Implement the parser"),
//!             TaskSpec::new("reviewer", "Review the parser design"),
//!         ],
//!         None,
//!         Some(AggregateMode::Concatenate),
//!     )
//!     .await?;
//!
//! println!("{}", outcome.aggregate.unwrap().output);
//! ```

pub mod aggregate;
pub mod orchestrator;
pub mod pool;
pub mod types;

pub use aggregate::{
    AggregateDetails, AggregateMode, AggregateResult, DiffPreview, FailedInput, RankedEntry,
    ResultAggregator, VoteEntry,
};
pub use orchestrator::{Orchestrator, ParallelDelegation, SingleDelegation};
pub use pool::{WorkerHandle, WorkerPool};
pub use types::{TaskResult, TaskSpec, WorkerId, WorkerStatus};
