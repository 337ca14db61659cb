//! # Database handle
//!
//! A vault owns exactly one SQLite connection. It is shared behind a mutex so
//! every store (entries, embeddings, search) goes through a single writer, and
//! each call holds the lock only for the duration of its own statement or
//! transaction. The lock is never held across an `.await`.

use std::sync::{Arc, Mutex};

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use tracing::debug;

use crate::config::establish_connection;
use crate::error::{LoreError, Result};

/// Idempotent schema bootstrap, run on every open.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS codex_entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    entry_type TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TIMESTAMP NOT NULL,
    updated_at TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS codex_embeddings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entry_id INTEGER NOT NULL REFERENCES codex_entries(id) ON DELETE CASCADE,
    vector BLOB NOT NULL,
    model_version TEXT NOT NULL,
    created_at TIMESTAMP NOT NULL,
    updated_at TIMESTAMP NOT NULL,
    UNIQUE(entry_id, model_version)
);

CREATE INDEX IF NOT EXISTS idx_codex_embeddings_version
    ON codex_embeddings(model_version);
"#;

/// Shared handle to the vault database.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<SqliteConnection>>,
}

impl Database {
    /// Connect to `db_url`, enable foreign keys and create missing tables.
    ///
    /// # Errors
    /// Connection failures and DDL errors.
    pub fn open(db_url: &str) -> Result<Self> {
        debug!("Opening vault database: {}", db_url);
        let mut conn = establish_connection(db_url)?;
        conn.batch_execute("PRAGMA foreign_keys = ON;")?;
        conn.batch_execute(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// A private in-memory database, mostly useful in tests.
    pub fn in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    /// Run `f` with exclusive access to the connection.
    pub fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T>,
    {
        let mut guard = self
            .conn
            .lock()
            .map_err(|_| LoreError::Configuration("database connection lock poisoned".into()))?;
        f(&mut guard)
    }
}
