//! SQLite database layer for the Antfarm coordination kernel.
//!
//! Uses rusqlite with WAL mode for concurrent read performance. Database
//! operations on async paths are executed via `tokio::task::spawn_blocking`
//! to avoid blocking the runtime. Engine mutations go through
//! [`Database::with_tx`], which serializes writers behind one mutex and
//! wraps the closure in a single transaction.

use rusqlite::{Connection, Transaction};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::CoreError;

/// Thread-safe handle to the SQLite database.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) a SQLite database at the given path.
    pub fn open(db_path: &str) -> Result<Self, CoreError> {
        let path = Path::new(db_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let conn = Connection::open(db_path)
            .map_err(|e| CoreError::Store(format!("Failed to open database: {}", e)))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| CoreError::Store(format!("Failed to set pragmas: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_tables()?;

        tracing::info!("SQLite database opened at: {}", db_path);
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, CoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| CoreError::Store(format!("Failed to open in-memory db: {}", e)))?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| CoreError::Store(format!("Failed to set pragmas: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_tables()?;
        Ok(db)
    }

    /// Execute a closure with access to the database connection.
    /// Automatically handles locking and error conversion.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| CoreError::Store(format!("Lock poisoned: {}", e)))?;
        f(&conn).map_err(|e| CoreError::Store(e.to_string()))
    }

    /// Execute a closure with access to the database connection (async-friendly).
    pub async fn with_conn_async<F, T>(&self, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || db.with_conn(f))
            .await
            .map_err(|e| CoreError::Store(format!("Task join error: {}", e)))?
    }

    /// Run a closure inside a single transaction.
    ///
    /// The closure may return domain errors; any error rolls the transaction
    /// back. This is the single-writer path every multi-row engine operation
    /// funnels through.
    pub fn with_tx<F, T>(&self, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, CoreError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| CoreError::Store(format!("Lock poisoned: {}", e)))?;
        let tx = conn
            .transaction()
            .map_err(|e| CoreError::Store(e.to_string()))?;
        let out = f(&tx)?;
        tx.commit().map_err(|e| CoreError::Store(e.to_string()))?;
        Ok(out)
    }

    /// Transactional closure on a blocking thread (async-friendly).
    pub async fn with_tx_async<F, T>(&self, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, CoreError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || db.with_tx(f))
            .await
            .map_err(|e| CoreError::Store(format!("Task join error: {}", e)))?
    }

    /// Create all tables if they don't exist.
    fn initialize_tables(&self) -> Result<(), CoreError> {
        self.with_conn(|conn| {
            conn.execute_batch(
                "
                CREATE TABLE IF NOT EXISTS workflows (
                    id              TEXT PRIMARY KEY,
                    name            TEXT NOT NULL,
                    version         TEXT NOT NULL DEFAULT '1',
                    spec            TEXT NOT NULL,
                    created_at      INTEGER NOT NULL,
                    updated_at      INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS runs (
                    id                  TEXT PRIMARY KEY,
                    workflow_id         TEXT NOT NULL REFERENCES workflows(id),
                    task                TEXT NOT NULL,
                    lead_agent          TEXT NOT NULL DEFAULT '',
                    session             TEXT NOT NULL DEFAULT '',
                    status              TEXT NOT NULL DEFAULT 'running',
                    current_step_index  INTEGER NOT NULL DEFAULT 0,
                    created_at          INTEGER NOT NULL,
                    updated_at          INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_runs_workflow ON runs(workflow_id);
                CREATE INDEX IF NOT EXISTS idx_runs_status ON runs(status);

                CREATE TABLE IF NOT EXISTS steps (
                    id                  TEXT PRIMARY KEY,
                    run_id              TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
                    step_index          INTEGER NOT NULL,
                    step_id             TEXT NOT NULL,
                    agent_id            TEXT NOT NULL,
                    status              TEXT NOT NULL DEFAULT 'waiting',
                    retry_count         INTEGER NOT NULL DEFAULT 0,
                    step_type           TEXT NOT NULL DEFAULT 'single',
                    loop_config         TEXT,
                    current_story_id    TEXT,
                    created_at          INTEGER NOT NULL,
                    updated_at          INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_steps_run ON steps(run_id);
                CREATE INDEX IF NOT EXISTS idx_steps_claim ON steps(agent_id, status);

                CREATE TABLE IF NOT EXISTS stories (
                    id                  TEXT PRIMARY KEY,
                    run_id              TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
                    story_index         INTEGER NOT NULL,
                    story_id            TEXT NOT NULL,
                    title               TEXT NOT NULL,
                    description         TEXT NOT NULL DEFAULT '',
                    acceptance_criteria TEXT NOT NULL DEFAULT '[]',
                    status              TEXT NOT NULL DEFAULT 'pending',
                    output              TEXT,
                    retry_count         INTEGER NOT NULL DEFAULT 0,
                    max_retries         INTEGER NOT NULL DEFAULT 2,
                    created_at          INTEGER NOT NULL,
                    updated_at          INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_stories_run ON stories(run_id);

                CREATE TABLE IF NOT EXISTS run_context (
                    run_id      TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
                    key         TEXT NOT NULL,
                    value       TEXT NOT NULL,
                    PRIMARY KEY (run_id, key)
                );

                CREATE TABLE IF NOT EXISTS step_results (
                    seq         INTEGER PRIMARY KEY AUTOINCREMENT,
                    run_id      TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
                    step_id     TEXT NOT NULL,
                    agent_id    TEXT NOT NULL,
                    output      TEXT NOT NULL,
                    status      TEXT NOT NULL,
                    created_at  INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_step_results_run ON step_results(run_id);
                ",
            )
        })?;
        self.run_migrations()
    }

    /// Apply incremental migrations for schema changes on existing databases.
    fn run_migrations(&self) -> Result<(), CoreError> {
        self.with_conn(|conn| {
            // Columns added after the first release (ignore error if already present)
            let _ = conn.execute("ALTER TABLE steps ADD COLUMN current_story_id TEXT", []);
            let _ = conn.execute(
                "ALTER TABLE runs ADD COLUMN session TEXT NOT NULL DEFAULT ''",
                [],
            );
            conn.execute_batch(
                "CREATE INDEX IF NOT EXISTS idx_steps_claim ON steps(agent_id, status);",
            )
        })
    }
}
