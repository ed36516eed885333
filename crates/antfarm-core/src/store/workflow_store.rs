use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};

use crate::db::Database;
use crate::error::CoreError;
use crate::models::workflow::WorkflowSpec;

/// Installed workflow specs, stored as opaque JSON blobs.
#[derive(Clone)]
pub struct WorkflowStore {
    db: Database,
}

impl WorkflowStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or replace an installed workflow spec.
    pub async fn install(&self, spec: &WorkflowSpec) -> Result<(), CoreError> {
        let blob = serde_json::to_string(spec).map_err(|e| CoreError::Store(e.to_string()))?;
        let s = spec.clone();
        self.db
            .with_conn_async(move |conn| {
                let now = Utc::now().timestamp_millis();
                conn.execute(
                    "INSERT INTO workflows (id, name, version, spec, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?5) \
                     ON CONFLICT(id) DO UPDATE SET \
                       name = excluded.name, \
                       version = excluded.version, \
                       spec = excluded.spec, \
                       updated_at = excluded.updated_at",
                    rusqlite::params![s.id, s.name, s.version, blob, now],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn get(&self, id: &str) -> Result<Option<WorkflowSpec>, CoreError> {
        let id = id.to_string();
        self.db
            .with_conn_async(move |conn| get_spec(conn, &id))
            .await
    }

    pub async fn list(&self) -> Result<Vec<WorkflowSpec>, CoreError> {
        self.db
            .with_conn_async(move |conn| {
                let mut stmt =
                    conn.prepare("SELECT spec FROM workflows ORDER BY created_at ASC")?;
                let blobs = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(blobs
                    .into_iter()
                    .filter_map(|b| serde_json::from_str(&b).ok())
                    .collect())
            })
            .await
    }

    pub async fn remove(&self, id: &str) -> Result<bool, CoreError> {
        let id = id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let n = conn.execute("DELETE FROM workflows WHERE id = ?1", rusqlite::params![id])?;
                Ok(n > 0)
            })
            .await
    }
}

pub(crate) fn get_spec(
    conn: &Connection,
    id: &str,
) -> Result<Option<WorkflowSpec>, rusqlite::Error> {
    let blob: Option<String> = conn
        .query_row(
            "SELECT spec FROM workflows WHERE id = ?1",
            rusqlite::params![id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(blob.and_then(|b| serde_json::from_str(&b).ok()))
}
