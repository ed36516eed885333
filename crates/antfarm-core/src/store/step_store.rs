//! Row helpers for step instances.
//!
//! Steps are only ever mutated by the engine inside a transaction, so this
//! module exposes `pub(crate)` functions over `&Connection` instead of an
//! async store struct; reads for the external surface flow through
//! `RunStore::get_detail`.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::models::step::{StepInstance, StepStatus};
use crate::models::workflow::{StepType, WorkflowSpec};

const STEP_COLUMNS: &str = "id, run_id, step_index, step_id, agent_id, status, retry_count, \
     step_type, loop_config, current_story_id, created_at, updated_at";

/// Insert one step row per spec step: index 0 `pending`, the rest `waiting`.
/// Step type and loop config are denormalized from the definition.
pub(crate) fn insert_for_spec(
    conn: &Connection,
    run_id: &str,
    spec: &WorkflowSpec,
) -> Result<(), rusqlite::Error> {
    let now = Utc::now().timestamp_millis();
    for (index, def) in spec.steps.iter().enumerate() {
        let status = if index == 0 {
            StepStatus::Pending
        } else {
            StepStatus::Waiting
        };
        let loop_blob = def
            .loop_config
            .as_ref()
            .map(|lc| serde_json::to_string(lc).unwrap_or_default());
        conn.execute(
            "INSERT INTO steps (id, run_id, step_index, step_id, agent_id, status, \
             retry_count, step_type, loop_config, current_story_id, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?8, NULL, ?9, ?9)",
            rusqlite::params![
                Uuid::new_v4().to_string(),
                run_id,
                index as u32,
                def.id,
                def.agent,
                status.as_str(),
                def.step_type.as_str(),
                loop_blob,
                now,
            ],
        )?;
    }
    Ok(())
}

pub(crate) fn get(
    conn: &Connection,
    instance_id: &str,
) -> Result<Option<StepInstance>, rusqlite::Error> {
    conn.query_row(
        &format!("SELECT {STEP_COLUMNS} FROM steps WHERE id = ?1"),
        rusqlite::params![instance_id],
        |row| Ok(row_to_step(row)),
    )
    .optional()
}

pub(crate) fn get_by_def(
    conn: &Connection,
    run_id: &str,
    step_id: &str,
) -> Result<Option<StepInstance>, rusqlite::Error> {
    conn.query_row(
        &format!("SELECT {STEP_COLUMNS} FROM steps WHERE run_id = ?1 AND step_id = ?2"),
        rusqlite::params![run_id, step_id],
        |row| Ok(row_to_step(row)),
    )
    .optional()
}

pub(crate) fn list_by_run(
    conn: &Connection,
    run_id: &str,
) -> Result<Vec<StepInstance>, rusqlite::Error> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {STEP_COLUMNS} FROM steps WHERE run_id = ?1 ORDER BY step_index ASC"
    ))?;
    let rows = stmt
        .query_map(rusqlite::params![run_id], |row| Ok(row_to_step(row)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// The lowest-order `pending` step for this agent across all `running`
/// runs. Tie-break: run creation time, then step index.
pub(crate) fn find_claimable(
    conn: &Connection,
    agent_id: &str,
) -> Result<Option<StepInstance>, rusqlite::Error> {
    conn.query_row(
        "SELECT s.id, s.run_id, s.step_index, s.step_id, s.agent_id, s.status, \
         s.retry_count, s.step_type, s.loop_config, s.current_story_id, \
         s.created_at, s.updated_at \
         FROM steps s JOIN runs r ON r.id = s.run_id \
         WHERE s.status = 'pending' AND s.agent_id = ?1 AND r.status = 'running' \
         ORDER BY r.created_at ASC, s.step_index ASC, r.id ASC LIMIT 1",
        rusqlite::params![agent_id],
        |row| Ok(row_to_step(row)),
    )
    .optional()
}

pub(crate) fn update_status(
    conn: &Connection,
    instance_id: &str,
    status: StepStatus,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "UPDATE steps SET status = ?1, updated_at = ?2 WHERE id = ?3",
        rusqlite::params![status.as_str(), Utc::now().timestamp_millis(), instance_id],
    )?;
    Ok(())
}

pub(crate) fn set_retry_count(
    conn: &Connection,
    instance_id: &str,
    retry_count: u32,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "UPDATE steps SET retry_count = ?1, updated_at = ?2 WHERE id = ?3",
        rusqlite::params![retry_count, Utc::now().timestamp_millis(), instance_id],
    )?;
    Ok(())
}

pub(crate) fn set_current_story(
    conn: &Connection,
    instance_id: &str,
    story_id: Option<&str>,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "UPDATE steps SET current_story_id = ?1, updated_at = ?2 WHERE id = ?3",
        rusqlite::params![story_id, Utc::now().timestamp_millis(), instance_id],
    )?;
    Ok(())
}

/// First `waiting` step after the given index, in spec order.
pub(crate) fn next_waiting_after(
    conn: &Connection,
    run_id: &str,
    index: u32,
) -> Result<Option<StepInstance>, rusqlite::Error> {
    conn.query_row(
        &format!(
            "SELECT {STEP_COLUMNS} FROM steps \
             WHERE run_id = ?1 AND step_index > ?2 AND status = 'waiting' \
             ORDER BY step_index ASC LIMIT 1"
        ),
        rusqlite::params![run_id, index],
        |row| Ok(row_to_step(row)),
    )
    .optional()
}

/// Rewind support: reset an inclusive index range back to `waiting` with a
/// clean retry count and no story in flight.
pub(crate) fn reset_range(
    conn: &Connection,
    run_id: &str,
    from_index: u32,
    to_index: u32,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "UPDATE steps SET status = 'waiting', retry_count = 0, current_story_id = NULL, \
         updated_at = ?1 WHERE run_id = ?2 AND step_index >= ?3 AND step_index <= ?4",
        rusqlite::params![Utc::now().timestamp_millis(), run_id, from_index, to_index],
    )?;
    Ok(())
}

/// The run's loop-typed step, if any.
pub(crate) fn find_loop_step(
    conn: &Connection,
    run_id: &str,
) -> Result<Option<StepInstance>, rusqlite::Error> {
    conn.query_row(
        &format!(
            "SELECT {STEP_COLUMNS} FROM steps \
             WHERE run_id = ?1 AND step_type = 'loop' ORDER BY step_index ASC LIMIT 1"
        ),
        rusqlite::params![run_id],
        |row| Ok(row_to_step(row)),
    )
    .optional()
}

/// Failed steps of a run (used by resume to re-arm them).
pub(crate) fn list_failed(
    conn: &Connection,
    run_id: &str,
) -> Result<Vec<StepInstance>, rusqlite::Error> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {STEP_COLUMNS} FROM steps WHERE run_id = ?1 AND status = 'failed' \
         ORDER BY step_index ASC"
    ))?;
    let rows = stmt
        .query_map(rusqlite::params![run_id], |row| Ok(row_to_step(row)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn row_to_step(row: &Row<'_>) -> StepInstance {
    let created_ms: i64 = row.get(10).unwrap_or(0);
    let updated_ms: i64 = row.get(11).unwrap_or(0);
    StepInstance {
        id: row.get(0).unwrap_or_default(),
        run_id: row.get(1).unwrap_or_default(),
        step_index: row.get(2).unwrap_or(0),
        step_id: row.get(3).unwrap_or_default(),
        agent_id: row.get(4).unwrap_or_default(),
        status: StepStatus::from_str(&row.get::<_, String>(5).unwrap_or_default())
            .unwrap_or(StepStatus::Waiting),
        retry_count: row.get(6).unwrap_or(0),
        step_type: StepType::from_str(&row.get::<_, String>(7).unwrap_or_default())
            .unwrap_or(StepType::Single),
        loop_config: row
            .get::<_, Option<String>>(8)
            .unwrap_or(None)
            .and_then(|s| serde_json::from_str(&s).ok()),
        current_story_id: row.get(9).unwrap_or(None),
        created_at: chrono::DateTime::from_timestamp_millis(created_ms).unwrap_or_else(Utc::now),
        updated_at: chrono::DateTime::from_timestamp_millis(updated_ms).unwrap_or_else(Utc::now),
    }
}
