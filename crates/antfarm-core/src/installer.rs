//! Workflow installation: persist the spec, create one workspace directory
//! per agent, and register the polling jobs that drive agents to `claim`.
//!
//! Gateway trouble never affects core state: job registration failures are
//! logged and reported back, the install itself stands.

use crate::error::CoreError;
use crate::models::workflow::WorkflowSpec;
use crate::state::AppStateInner;

/// Install (or replace) a workflow. Returns warnings for polling jobs that
/// could not be registered.
pub async fn install(state: &AppStateInner, spec: &WorkflowSpec) -> Result<Vec<String>, CoreError> {
    state.workflow_store.install(spec).await?;

    for agent in &spec.agents {
        let dir = crate::workspace::agent_workspace_dir(&state.paths, spec, &agent.id);
        std::fs::create_dir_all(&dir).map_err(|e| {
            CoreError::Io(format!(
                "Failed to create workspace '{}': {}",
                dir.display(),
                e
            ))
        })?;
    }

    let mut warnings = Vec::new();
    if state.gateway.is_configured() {
        for agent in &spec.agents {
            let job = poll_job(spec, &agent.id);
            if let Err(e) = state.gateway.add_job(&job).await {
                tracing::warn!(agent = %agent.id, error = %e, "failed to register poll job");
                warnings.push(format!("poll job for '{}': {}", agent.id, e));
            }
        }
    } else {
        tracing::info!("no cron gateway configured, skipping poll registration");
    }

    tracing::info!(workflow = %spec.id, version = %spec.version, "workflow installed");
    Ok(warnings)
}

/// Remove an installed workflow and best-effort drop its polling jobs.
/// Returns false when no such workflow was installed.
pub async fn uninstall(state: &AppStateInner, id: &str) -> Result<bool, CoreError> {
    let spec = state.workflow_store.get(id).await?;
    let removed = state.workflow_store.remove(id).await?;

    if let Some(spec) = spec {
        if state.gateway.is_configured() {
            for agent in &spec.agents {
                let job = serde_json::json!({ "name": job_name(&spec.id, &agent.id) });
                if let Err(e) = state.gateway.remove_job(&job).await {
                    tracing::warn!(agent = %agent.id, error = %e, "failed to remove poll job");
                }
            }
        }
    }

    Ok(removed)
}

fn job_name(workflow_id: &str, agent_id: &str) -> String {
    format!("antfarm-{}-{}", workflow_id, agent_id)
}

fn poll_job(spec: &WorkflowSpec, agent_id: &str) -> serde_json::Value {
    serde_json::json!({
        "name": job_name(&spec.id, agent_id),
        "schedule": "*/1 * * * *",
        "command": format!("antfarm step claim --agent {}", agent_id),
    })
}
