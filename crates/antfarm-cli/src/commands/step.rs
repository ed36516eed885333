//! `antfarm step` — the agent-facing claim / complete / fail surface.

use std::io::Read;

use antfarm_core::state::AppState;
use antfarm_core::CoreError;

use super::print_json;

pub async fn claim(state: &AppState, agent: &str) -> Result<(), CoreError> {
    match state.engine.claim(agent).await? {
        Some(work) => print_json(&work),
        None => print_json(&serde_json::json!({ "claimed": null })),
    }
    Ok(())
}

/// Report a step's output. Reads stdin when `--output` is not given so
/// agents can pipe multi-line results.
pub async fn complete(
    state: &AppState,
    step_instance_id: &str,
    output: Option<&str>,
) -> Result<(), CoreError> {
    let output = match output {
        Some(o) => o.to_string(),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .map_err(|e| CoreError::Io(format!("Failed to read stdin: {}", e)))?;
            buf
        }
    };
    let result = state.engine.complete(step_instance_id, &output).await?;
    print_json(&result);
    Ok(())
}

pub async fn fail(
    state: &AppState,
    step_instance_id: &str,
    error: &str,
) -> Result<(), CoreError> {
    let result = state.engine.fail(step_instance_id, error).await?;
    print_json(&result);
    Ok(())
}

pub async fn stories(state: &AppState, run_id: &str) -> Result<(), CoreError> {
    let stories = state.story_store.list(run_id).await?;
    print_json(&stories);
    Ok(())
}
