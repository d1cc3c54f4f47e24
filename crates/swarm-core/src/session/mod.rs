//! Session management module
//!
//! A session is the durable record of one orchestration run: the submitted
//! tasks, their results, the aggregate, and the run's status.

mod backend;
mod store;
mod types;

pub use backend::SessionBackend;
pub use store::SessionStore;
pub use types::{Session, SessionStatus, SessionUpdate};
