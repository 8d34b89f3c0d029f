use std::path::Path;
use std::sync::{Mutex, MutexGuard};

#[cfg(test)]
use mockall::automock;
use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::StateError;

/// Key under which the interpreter used for the last install is remembered
pub const INTERPRETER_PATH_KEY: &str = "interpreterPath";

/// Schema migrations
/// Each version contains a list of SQL statements to execute
const MIGRATIONS: &[&[&str]] = &[
    // v1: key/value state
    &[r#"
    CREATE TABLE IF NOT EXISTS state (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#],
];

/// Trait for persisting small pieces of client state across sessions
#[cfg_attr(test, automock)]
pub trait StateStorer: Send + Sync + 'static {
    fn get(&self, key: &str) -> Result<Option<String>, StateError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StateError>;
}

pub struct StateStore {
    conn: Mutex<Connection>,
}

impl StateStore {
    pub fn new(db_path: &Path) -> Result<Self, StateError> {
        info!("Opening state database at {:?}", db_path);

        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        Self::with_connection(conn)
    }

    /// Non-persistent store, used when the data directory is unavailable
    pub fn in_memory() -> Result<Self, StateError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StateError> {
        Self::apply_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>, StateError> {
        self.conn.lock().map_err(|_| StateError::LockPoisoned)
    }

    /// Apply pending migrations based on user_version pragma
    fn apply_migrations(conn: &Connection) -> Result<(), StateError> {
        let current_version: i32 =
            conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

        for (i, statements) in MIGRATIONS.iter().enumerate() {
            let version = (i + 1) as i32;
            if version > current_version {
                for sql in *statements {
                    conn.execute(sql, [])?;
                }
                debug!("Applied migration v{}", version);
            }
        }

        let target_version = MIGRATIONS.len() as i32;
        if target_version > current_version {
            conn.pragma_update(None, "user_version", target_version)?;
        }

        Ok(())
    }
}

impl StateStorer for StateStore {
    fn get(&self, key: &str) -> Result<Option<String>, StateError> {
        let conn = self.lock_conn()?;
        let result = conn.query_row("SELECT value FROM state WHERE key = ?1", [key], |row| {
            row.get(0)
        });

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StateError> {
        debug!("Persisting {} = {}", key, value);
        let now = chrono::Utc::now().timestamp_millis();
        let conn = self.lock_conn()?;
        conn.execute(
            r#"
            INSERT INTO state (key, value, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
            (key, value, now),
        )?;
        Ok(())
    }
}
