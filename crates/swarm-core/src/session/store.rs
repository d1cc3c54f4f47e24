//! Session persistence using SQLite

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

use super::types::{Session, SessionStatus, SessionUpdate};
use crate::agents::TaskSpec;
use crate::{Error, Result};

const SESSION_COLUMNS: &str =
    "id, name, status, tasks, results, aggregate, error, created_at, updated_at";

/// SQLite-based session store
///
/// One row per session; tasks, results and aggregate are JSON columns. The
/// connection sits behind a mutex, so concurrent updates to different ids
/// never interleave and same-id updates are last-write-wins.
pub struct SessionStore {
    conn: Mutex<Connection>,
}

impl SessionStore {
    /// Open (or create) a file-backed store
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        info!("Session store opened at {}", db_path.display());
        Self::with_connection(conn)
    }

    /// Create an in-memory session store (for testing)
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_tables()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Store("session store lock poisoned".to_string()))
    }

    fn init_tables(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                status TEXT NOT NULL,
                tasks TEXT NOT NULL,
                results TEXT NOT NULL,
                aggregate TEXT,
                error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_sessions_created_at ON sessions(created_at)",
            [],
        )?;

        Ok(())
    }

    /// Create and persist a new pending session
    pub fn create(&self, name: impl Into<String>, tasks: Vec<TaskSpec>) -> Result<Session> {
        let session = Session::new(name, tasks);
        let conn = self.lock()?;
        write_session(&conn, &session)?;
        debug!(session_id = %session.id, tasks = session.tasks.len(), "Session created");
        Ok(session)
    }

    /// Shallow-merge `update` into session `id` and return the new snapshot
    pub fn update(&self, id: &str, update: SessionUpdate) -> Result<Session> {
        let conn = self.lock()?;
        let mut session =
            read_session(&conn, id)?.ok_or_else(|| Error::SessionNotFound(id.to_string()))?;
        session.apply(update);
        write_session(&conn, &session)?;
        debug!(session_id = %id, status = %session.status, "Session updated");
        Ok(session)
    }

    /// Load a session by ID
    pub fn get(&self, id: &str) -> Result<Option<Session>> {
        let conn = self.lock()?;
        read_session(&conn, id)
    }

    /// All sessions, newest first
    pub fn list(&self) -> Result<Vec<Session>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions ORDER BY created_at DESC, id DESC"
        ))?;

        let sessions = stmt.query_map([], session_from_row)?;

        let mut result = Vec::new();
        for session in sessions {
            result.push(session?);
        }
        Ok(result)
    }

    /// Delete a session by ID; returns whether it existed
    pub fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let affected = conn.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

fn write_session(conn: &Connection, session: &Session) -> Result<()> {
    let tasks_json = serde_json::to_string(&session.tasks)?;
    let results_json = serde_json::to_string(&session.results)?;
    let aggregate_json = session
        .aggregate
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    conn.execute(
        "INSERT OR REPLACE INTO sessions
         (id, name, status, tasks, results, aggregate, error, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            session.id,
            session.name,
            session.status.as_str(),
            tasks_json,
            results_json,
            aggregate_json,
            session.error,
            format_timestamp(&session.created_at),
            format_timestamp(&session.updated_at),
        ],
    )?;
    Ok(())
}

fn read_session(conn: &Connection, id: &str) -> Result<Option<Session>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"
    ))?;
    Ok(stmt.query_row(params![id], session_from_row).optional()?)
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    // Fixed width keeps lexicographic order equal to time order
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error(
    column: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(err))
}

fn json_column<T: serde::de::DeserializeOwned>(
    row: &Row<'_>,
    column: usize,
) -> rusqlite::Result<T> {
    let raw: String = row.get(column)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(column, e))
}

fn timestamp_column(row: &Row<'_>, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(column)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| conversion_error(column, e))
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    let status: String = row.get(2)?;
    let status = status
        .parse::<SessionStatus>()
        .map_err(|e| conversion_error(2, e))?;

    let aggregate = match row.get::<_, Option<String>>(5)? {
        Some(raw) => Some(serde_json::from_str(&raw).map_err(|e| conversion_error(5, e))?),
        None => None,
    };

    Ok(Session {
        id: row.get(0)?,
        name: row.get(1)?,
        status,
        tasks: json_column(row, 3)?,
        results: json_column(row, 4)?,
        aggregate,
        error: row.get(6)?,
        created_at: timestamp_column(row, 7)?,
        updated_at: timestamp_column(row, 8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::TaskResult;
    use std::sync::Arc;

    fn tasks() -> Vec<TaskSpec> {
        vec![
            TaskSpec::new("coder", "write it"),
            TaskSpec::new("reviewer", "check it").with_input("diff"),
        ]
    }

    #[test]
    fn test_create_and_get() {
        let store = SessionStore::in_memory().unwrap();
        let session = store.create("batch", tasks()).unwrap();

        assert_eq!(session.status, SessionStatus::Pending);
        assert!(session.results.is_empty());

        let loaded = store.get(&session.id).unwrap().unwrap();
        assert_eq!(loaded, session);
    }

    #[test]
    fn test_get_is_stable() {
        let store = SessionStore::in_memory().unwrap();
        let session = store.create("batch", tasks()).unwrap();

        let first = store.get(&session.id).unwrap();
        let second = store.get(&session.id).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_get_missing() {
        let store = SessionStore::in_memory().unwrap();
        assert!(store.get("nope").unwrap().is_none());
    }

    #[test]
    fn test_update() {
        let store = SessionStore::in_memory().unwrap();
        let session = store.create("batch", tasks()).unwrap();

        store.update(&session.id, SessionUpdate::running()).unwrap();
        let results = vec![
            TaskResult::success("coder", "write it", "fn main() {}", 12),
            TaskResult::failure("reviewer", "check it", "timed out", 30),
        ];
        let updated = store
            .update(&session.id, SessionUpdate::completed(results.clone(), None))
            .unwrap();

        assert_eq!(updated.id, session.id);
        assert_eq!(updated.status, SessionStatus::Completed);
        assert!(updated.updated_at >= session.updated_at);

        let loaded = store.get(&session.id).unwrap().unwrap();
        assert_eq!(loaded.results, results);
        assert_eq!(loaded.tasks, session.tasks);
        assert_eq!(loaded.created_at, session.created_at);
    }

    #[test]
    fn test_update_missing() {
        let store = SessionStore::in_memory().unwrap();
        let err = store.update("nope", SessionUpdate::running()).unwrap_err();
        assert!(matches!(err, Error::SessionNotFound(id) if id == "nope"));
    }

    #[test]
    fn test_list_newest_first() {
        let store = SessionStore::in_memory().unwrap();
        let first = store.create("first", Vec::new()).unwrap();
        std::thread::sleep(Duration::from_millis(2));
        let second = store.create("second", Vec::new()).unwrap();
        std::thread::sleep(Duration::from_millis(2));
        let third = store.create("third", Vec::new()).unwrap();

        let ids: Vec<String> = store.list().unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![third.id, second.id, first.id]);
    }

    #[test]
    fn test_delete_and_count() {
        let store = SessionStore::in_memory().unwrap();
        let session = store.create("s", Vec::new()).unwrap();
        store.create("t", Vec::new()).unwrap();
        assert_eq!(store.count().unwrap(), 2);

        assert!(store.delete(&session.id).unwrap());
        assert!(!store.delete(&session.id).unwrap());
        assert_eq!(store.count().unwrap(), 1);
        assert!(store.get(&session.id).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_row_is_error() {
        let store = SessionStore::in_memory().unwrap();
        let session = store.create("s", tasks()).unwrap();
        {
            let conn = store.lock().unwrap();
            conn.execute(
                "UPDATE sessions SET results = 'not json' WHERE id = ?1",
                params![session.id],
            )
            .unwrap();
        }

        let err = store.get(&session.id).unwrap_err();
        assert!(matches!(err, Error::Database(_)));
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.db");

        let id = {
            let store = SessionStore::open(&path).unwrap();
            let session = store.create("durable", tasks()).unwrap();
            store
                .update(&session.id, SessionUpdate::failed("aggregation failed"))
                .unwrap();
            session.id
        };

        let reopened = SessionStore::open(&path).unwrap();
        let loaded = reopened.get(&id).unwrap().unwrap();
        assert_eq!(loaded.name, "durable");
        assert_eq!(loaded.status, SessionStatus::Failed);
        assert_eq!(loaded.error.as_deref(), Some("aggregation failed"));
        assert_eq!(loaded.tasks.len(), 2);
    }

    #[test]
    fn test_concurrent_updates_on_different_ids() {
        let store = Arc::new(SessionStore::in_memory().unwrap());
        let ids: Vec<String> = (0..8)
            .map(|i| store.create(format!("s{i}"), Vec::new()).unwrap().id)
            .collect();

        std::thread::scope(|scope| {
            for id in &ids {
                let store = Arc::clone(&store);
                scope.spawn(move || {
                    store.update(id, SessionUpdate::running()).unwrap();
                    store
                        .update(id, SessionUpdate::completed(Vec::new(), None))
                        .unwrap();
                });
            }
        });

        for id in &ids {
            let session = store.get(id).unwrap().unwrap();
            assert_eq!(session.status, SessionStatus::Completed);
        }
    }
}
