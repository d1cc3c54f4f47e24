//! Persistence seam for the orchestrator

use super::store::SessionStore;
use super::types::{Session, SessionUpdate};
use crate::Result;
use crate::agents::TaskSpec;

/// Anything that can hold sessions for the orchestrator
///
/// [`SessionStore`] is the SQLite implementation. Updates are shallow merges
/// that return the new snapshot.
pub trait SessionBackend: Send + Sync {
    fn create(&self, name: String, tasks: Vec<TaskSpec>) -> Result<Session>;

    fn update(&self, id: &str, update: SessionUpdate) -> Result<Session>;

    fn get(&self, id: &str) -> Result<Option<Session>>;

    /// Newest first
    fn list(&self) -> Result<Vec<Session>>;

    fn count(&self) -> Result<usize>;
}

impl SessionBackend for SessionStore {
    fn create(&self, name: String, tasks: Vec<TaskSpec>) -> Result<Session> {
        SessionStore::create(self, name, tasks)
    }

    fn update(&self, id: &str, update: SessionUpdate) -> Result<Session> {
        SessionStore::update(self, id, update)
    }

    fn get(&self, id: &str) -> Result<Option<Session>> {
        SessionStore::get(self, id)
    }

    fn list(&self) -> Result<Vec<Session>> {
        SessionStore::list(self)
    }

    fn count(&self) -> Result<usize> {
        SessionStore::count(self)
    }
}
