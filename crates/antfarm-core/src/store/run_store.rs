use std::collections::BTreeMap;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::db::Database;
use crate::error::CoreError;
use crate::models::run::{Run, RunDetail, RunStatus, StepResultRecord, StepResultStatus};
use crate::models::workflow::WorkflowSpec;
use crate::store::{step_store, story_store};

const RUN_COLUMNS: &str = "id, workflow_id, task, lead_agent, session, status, \
     current_step_index, created_at, updated_at";

/// Read surface over runs, their context, and their step results.
#[derive(Clone)]
pub struct RunStore {
    db: Database,
}

impl RunStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn get(&self, run_id: &str) -> Result<Option<Run>, CoreError> {
        let id = run_id.to_string();
        self.db.with_conn_async(move |conn| get_run(conn, &id)).await
    }

    /// A run with all its step instances and stories.
    pub async fn get_detail(&self, run_id: &str) -> Result<Option<RunDetail>, CoreError> {
        let id = run_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let Some(run) = get_run(conn, &id)? else {
                    return Ok(None);
                };
                let steps = step_store::list_by_run(conn, &id)?;
                let stories = story_store::list_by_run(conn, &id)?;
                Ok(Some(RunDetail { run, steps, stories }))
            })
            .await
    }

    pub async fn list(&self) -> Result<Vec<Run>, CoreError> {
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {RUN_COLUMNS} FROM runs ORDER BY created_at DESC"
                ))?;
                let rows = stmt
                    .query_map([], |row| Ok(row_to_run(row)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    pub async fn list_by_workflow(&self, workflow_id: &str) -> Result<Vec<Run>, CoreError> {
        let wf = workflow_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {RUN_COLUMNS} FROM runs WHERE workflow_id = ?1 \
                     ORDER BY created_at DESC"
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params![wf], |row| Ok(row_to_run(row)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    pub async fn context(&self, run_id: &str) -> Result<BTreeMap<String, String>, CoreError> {
        let id = run_id.to_string();
        self.db
            .with_conn_async(move |conn| get_context(conn, &id))
            .await
    }

    pub async fn results(&self, run_id: &str) -> Result<Vec<StepResultRecord>, CoreError> {
        let id = run_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT seq, run_id, step_id, agent_id, output, status, created_at \
                     FROM step_results WHERE run_id = ?1 ORDER BY seq ASC",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![id], |row| Ok(row_to_result(row)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }
}

// ── row helpers shared with the engine's transaction closures ───────────

/// Create a run with one step instance per spec step, the first `pending`
/// and the rest `waiting`. Seeds the run context with the task title.
pub(crate) fn create_run(
    conn: &Connection,
    spec: &WorkflowSpec,
    task: &str,
) -> Result<Run, rusqlite::Error> {
    let now = Utc::now();
    let run_id = Uuid::new_v4().to_string();
    let lead_agent = spec.steps.first().map(|s| s.agent.clone()).unwrap_or_default();
    let session = format!("antfarm/{}", &run_id[..8]);

    let run = Run {
        id: run_id.clone(),
        workflow_id: spec.id.clone(),
        task: task.to_string(),
        lead_agent,
        session,
        status: RunStatus::Running,
        current_step_index: 0,
        created_at: now,
        updated_at: now,
    };

    conn.execute(
        "INSERT INTO runs (id, workflow_id, task, lead_agent, session, status, \
         current_step_index, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        rusqlite::params![
            run.id,
            run.workflow_id,
            run.task,
            run.lead_agent,
            run.session,
            run.status.as_str(),
            run.current_step_index,
            now.timestamp_millis(),
            now.timestamp_millis(),
        ],
    )?;

    step_store::insert_for_spec(conn, &run.id, spec)?;
    set_context_value(conn, &run.id, "task", task)?;

    Ok(run)
}

pub(crate) fn get_run(conn: &Connection, run_id: &str) -> Result<Option<Run>, rusqlite::Error> {
    conn.query_row(
        &format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?1"),
        rusqlite::params![run_id],
        |row| Ok(row_to_run(row)),
    )
    .optional()
}

pub(crate) fn update_run_status(
    conn: &Connection,
    run_id: &str,
    status: RunStatus,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "UPDATE runs SET status = ?1, updated_at = ?2 WHERE id = ?3",
        rusqlite::params![status.as_str(), Utc::now().timestamp_millis(), run_id],
    )?;
    Ok(())
}

pub(crate) fn set_current_step_index(
    conn: &Connection,
    run_id: &str,
    index: u32,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "UPDATE runs SET current_step_index = ?1, updated_at = ?2 WHERE id = ?3",
        rusqlite::params![index, Utc::now().timestamp_millis(), run_id],
    )?;
    Ok(())
}

pub(crate) fn get_context(
    conn: &Connection,
    run_id: &str,
) -> Result<BTreeMap<String, String>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT key, value FROM run_context WHERE run_id = ?1")?;
    let rows = stmt
        .query_map(rusqlite::params![run_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows.into_iter().collect())
}

/// Last-writer-wins merge of context keys.
pub(crate) fn merge_context(
    conn: &Connection,
    run_id: &str,
    entries: &BTreeMap<String, String>,
) -> Result<(), rusqlite::Error> {
    for (key, value) in entries {
        set_context_value(conn, run_id, key, value)?;
    }
    Ok(())
}

pub(crate) fn set_context_value(
    conn: &Connection,
    run_id: &str,
    key: &str,
    value: &str,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO run_context (run_id, key, value) VALUES (?1, ?2, ?3) \
         ON CONFLICT(run_id, key) DO UPDATE SET value = excluded.value",
        rusqlite::params![run_id, key, value],
    )?;
    Ok(())
}

pub(crate) fn append_step_result(
    conn: &Connection,
    run_id: &str,
    step_id: &str,
    agent_id: &str,
    output: &str,
    status: StepResultStatus,
) -> Result<StepResultRecord, rusqlite::Error> {
    let now = Utc::now();
    conn.execute(
        "INSERT INTO step_results (run_id, step_id, agent_id, output, status, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            run_id,
            step_id,
            agent_id,
            output,
            status.as_str(),
            now.timestamp_millis()
        ],
    )?;
    Ok(StepResultRecord {
        seq: conn.last_insert_rowid(),
        run_id: run_id.to_string(),
        step_id: step_id.to_string(),
        agent_id: agent_id.to_string(),
        output: output.to_string(),
        status,
        created_at: now,
    })
}

pub(crate) fn latest_step_result(
    conn: &Connection,
    run_id: &str,
    step_id: &str,
) -> Result<Option<StepResultRecord>, rusqlite::Error> {
    conn.query_row(
        "SELECT seq, run_id, step_id, agent_id, output, status, created_at \
         FROM step_results WHERE run_id = ?1 AND step_id = ?2 ORDER BY seq DESC LIMIT 1",
        rusqlite::params![run_id, step_id],
        |row| Ok(row_to_result(row)),
    )
    .optional()
}

fn row_to_run(row: &Row<'_>) -> Run {
    let created_ms: i64 = row.get(7).unwrap_or(0);
    let updated_ms: i64 = row.get(8).unwrap_or(0);
    Run {
        id: row.get(0).unwrap_or_default(),
        workflow_id: row.get(1).unwrap_or_default(),
        task: row.get(2).unwrap_or_default(),
        lead_agent: row.get(3).unwrap_or_default(),
        session: row.get(4).unwrap_or_default(),
        status: RunStatus::from_str(&row.get::<_, String>(5).unwrap_or_default())
            .unwrap_or(RunStatus::Running),
        current_step_index: row.get(6).unwrap_or(0),
        created_at: chrono::DateTime::from_timestamp_millis(created_ms).unwrap_or_else(Utc::now),
        updated_at: chrono::DateTime::from_timestamp_millis(updated_ms).unwrap_or_else(Utc::now),
    }
}

fn row_to_result(row: &Row<'_>) -> StepResultRecord {
    let created_ms: i64 = row.get(6).unwrap_or(0);
    StepResultRecord {
        seq: row.get(0).unwrap_or(0),
        run_id: row.get(1).unwrap_or_default(),
        step_id: row.get(2).unwrap_or_default(),
        agent_id: row.get(3).unwrap_or_default(),
        output: row.get(4).unwrap_or_default(),
        status: StepResultStatus::from_str(&row.get::<_, String>(5).unwrap_or_default())
            .unwrap_or(StepResultStatus::Done),
        created_at: chrono::DateTime::from_timestamp_millis(created_ms).unwrap_or_else(Utc::now),
    }
}
