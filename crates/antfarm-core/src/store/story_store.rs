use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::db::Database;
use crate::error::CoreError;
use crate::models::story::{Story, StoryStatus};
use crate::output::StoryDraft;

const STORY_COLUMNS: &str = "id, run_id, story_index, story_id, title, description, \
     acceptance_criteria, status, output, retry_count, max_retries, created_at, updated_at";

/// Read surface over the stories of a run.
#[derive(Clone)]
pub struct StoryStore {
    db: Database,
}

impl StoryStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn list(&self, run_id: &str) -> Result<Vec<Story>, CoreError> {
        let id = run_id.to_string();
        self.db
            .with_conn_async(move |conn| list_by_run(conn, &id))
            .await
    }
}

// ── row helpers shared with the engine's transaction closures ───────────

/// Append parsed story drafts for a run, continuing the index sequence.
/// The retry budget comes from the owning loop step's definition.
pub(crate) fn insert_drafts(
    conn: &Connection,
    run_id: &str,
    drafts: &[StoryDraft],
    max_retries: u32,
) -> Result<(), rusqlite::Error> {
    let next_index: u32 = conn.query_row(
        "SELECT COALESCE(MAX(story_index) + 1, 0) FROM stories WHERE run_id = ?1",
        rusqlite::params![run_id],
        |row| row.get(0),
    )?;
    let now = Utc::now().timestamp_millis();
    for (offset, draft) in drafts.iter().enumerate() {
        conn.execute(
            "INSERT INTO stories (id, run_id, story_index, story_id, title, description, \
             acceptance_criteria, status, output, retry_count, max_retries, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', NULL, 0, ?8, ?9, ?9)",
            rusqlite::params![
                Uuid::new_v4().to_string(),
                run_id,
                next_index + offset as u32,
                draft.id,
                draft.title,
                draft.description,
                serde_json::to_string(&draft.acceptance_criteria).unwrap_or_default(),
                max_retries,
                now,
            ],
        )?;
    }
    Ok(())
}

pub(crate) fn list_by_run(conn: &Connection, run_id: &str) -> Result<Vec<Story>, rusqlite::Error> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {STORY_COLUMNS} FROM stories WHERE run_id = ?1 ORDER BY story_index ASC"
    ))?;
    let rows = stmt
        .query_map(rusqlite::params![run_id], |row| Ok(row_to_story(row)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// The lowest-indexed `pending` story of a run.
pub(crate) fn next_pending(
    conn: &Connection,
    run_id: &str,
) -> Result<Option<Story>, rusqlite::Error> {
    conn.query_row(
        &format!(
            "SELECT {STORY_COLUMNS} FROM stories \
             WHERE run_id = ?1 AND status = 'pending' ORDER BY story_index ASC LIMIT 1"
        ),
        rusqlite::params![run_id],
        |row| Ok(row_to_story(row)),
    )
    .optional()
}

pub(crate) fn any_pending(conn: &Connection, run_id: &str) -> Result<bool, rusqlite::Error> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM stories WHERE run_id = ?1 AND status = 'pending'",
        rusqlite::params![run_id],
        |row| row.get(0),
    )?;
    Ok(n > 0)
}

pub(crate) fn get_by_label(
    conn: &Connection,
    run_id: &str,
    story_id: &str,
) -> Result<Option<Story>, rusqlite::Error> {
    conn.query_row(
        &format!("SELECT {STORY_COLUMNS} FROM stories WHERE run_id = ?1 AND story_id = ?2"),
        rusqlite::params![run_id, story_id],
        |row| Ok(row_to_story(row)),
    )
    .optional()
}

pub(crate) fn update_status(
    conn: &Connection,
    row_id: &str,
    status: StoryStatus,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "UPDATE stories SET status = ?1, updated_at = ?2 WHERE id = ?3",
        rusqlite::params![status.as_str(), Utc::now().timestamp_millis(), row_id],
    )?;
    Ok(())
}

/// Mark a story `done` and record the developer's output.
pub(crate) fn complete(
    conn: &Connection,
    row_id: &str,
    output: &str,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "UPDATE stories SET status = 'done', output = ?1, updated_at = ?2 WHERE id = ?3",
        rusqlite::params![output, Utc::now().timestamp_millis(), row_id],
    )?;
    Ok(())
}

pub(crate) fn set_retry_count(
    conn: &Connection,
    row_id: &str,
    retry_count: u32,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "UPDATE stories SET retry_count = ?1, updated_at = ?2 WHERE id = ?3",
        rusqlite::params![retry_count, Utc::now().timestamp_millis(), row_id],
    )?;
    Ok(())
}

fn row_to_story(row: &Row<'_>) -> Story {
    let created_ms: i64 = row.get(11).unwrap_or(0);
    let updated_ms: i64 = row.get(12).unwrap_or(0);
    Story {
        id: row.get(0).unwrap_or_default(),
        run_id: row.get(1).unwrap_or_default(),
        story_index: row.get(2).unwrap_or(0),
        story_id: row.get(3).unwrap_or_default(),
        title: row.get(4).unwrap_or_default(),
        description: row.get(5).unwrap_or_default(),
        acceptance_criteria: row
            .get::<_, String>(6)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default(),
        status: StoryStatus::from_str(&row.get::<_, String>(7).unwrap_or_default())
            .unwrap_or(StoryStatus::Pending),
        output: row.get(8).unwrap_or(None),
        retry_count: row.get(9).unwrap_or(0),
        max_retries: row.get(10).unwrap_or(2),
        created_at: chrono::DateTime::from_timestamp_millis(created_ms).unwrap_or_else(Utc::now),
        updated_at: chrono::DateTime::from_timestamp_millis(updated_ms).unwrap_or_else(Utc::now),
    }
}
