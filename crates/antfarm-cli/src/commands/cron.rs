//! `antfarm cron` — read-only proxy to the cron gateway.

use antfarm_core::state::AppState;
use antfarm_core::CoreError;

use super::print_json;

pub async fn list(state: &AppState) -> Result<(), CoreError> {
    let jobs = state.gateway.list_jobs().await?;
    print_json(&jobs);
    Ok(())
}
