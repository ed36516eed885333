//! `antfarm workflow` — install, inspect, and launch workflows.

use antfarm_core::installer;
use antfarm_core::manifest::WorkflowManifest;
use antfarm_core::state::AppState;
use antfarm_core::CoreError;

use super::print_json;

pub async fn install(state: &AppState, manifest_path: &str) -> Result<(), CoreError> {
    let spec = WorkflowManifest::from_file(manifest_path)?.into_spec()?;
    let warnings = installer::install(state, &spec).await?;
    for warning in warnings {
        eprintln!("Warning: {}", warning);
    }
    println!(
        "Installed workflow '{}' ({} agents, {} steps)",
        spec.id,
        spec.agents.len(),
        spec.steps.len()
    );
    Ok(())
}

pub async fn update(state: &AppState, manifest_path: &str) -> Result<(), CoreError> {
    let spec = WorkflowManifest::from_file(manifest_path)?.into_spec()?;
    if state.workflow_store.get(&spec.id).await?.is_none() {
        return Err(CoreError::NotFound(format!(
            "workflow '{}' is not installed",
            spec.id
        )));
    }
    state.workflow_store.install(&spec).await?;
    println!("Updated workflow '{}' to version {}", spec.id, spec.version);
    Ok(())
}

pub async fn uninstall(state: &AppState, id: &str) -> Result<(), CoreError> {
    let removed = installer::uninstall(state, id).await?;
    print_json(&serde_json::json!({ "removed": removed }));
    Ok(())
}

pub async fn list(state: &AppState) -> Result<(), CoreError> {
    let specs = state.workflow_store.list().await?;
    let summaries: Vec<_> = specs
        .iter()
        .map(|s| {
            serde_json::json!({
                "id": s.id,
                "name": s.name,
                "version": s.version,
                "agents": s.agents.len(),
                "steps": s.steps.len(),
            })
        })
        .collect();
    print_json(&summaries);
    Ok(())
}

pub async fn status(state: &AppState, id: &str) -> Result<(), CoreError> {
    if state.workflow_store.get(id).await?.is_none() {
        return Err(CoreError::NotFound(format!("workflow '{}'", id)));
    }
    let runs = state.run_store.list_by_workflow(id).await?;
    print_json(&runs);
    Ok(())
}

pub async fn run(state: &AppState, id: &str, task: &str) -> Result<(), CoreError> {
    let run = state.engine.start_run(id, task).await?;
    print_json(&run);
    Ok(())
}
