//! `antfarm run` — run inspection and lifecycle commands.

use antfarm_core::state::AppState;
use antfarm_core::CoreError;

use super::print_json;

pub async fn list(state: &AppState) -> Result<(), CoreError> {
    let runs = state.run_store.list().await?;
    print_json(&runs);
    Ok(())
}

pub async fn get(state: &AppState, run_id: &str) -> Result<(), CoreError> {
    let detail = state
        .run_store
        .get_detail(run_id)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("run '{}'", run_id)))?;
    print_json(&detail);
    Ok(())
}

pub async fn cancel(state: &AppState, run_id: &str) -> Result<(), CoreError> {
    let run = state.engine.cancel_run(run_id).await?;
    print_json(&run);
    Ok(())
}

pub async fn pause(state: &AppState, run_id: &str) -> Result<(), CoreError> {
    let run = state.engine.pause_run(run_id).await?;
    print_json(&run);
    Ok(())
}

pub async fn resume(state: &AppState, run_id: &str) -> Result<(), CoreError> {
    let run = state.engine.resume_run(run_id).await?;
    print_json(&run);
    Ok(())
}
