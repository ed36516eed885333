//! CLI command implementations.
//!
//! Each submodule corresponds to a top-level CLI command and reuses the
//! antfarm-core domain logic through `AppState`.

pub mod cron;
pub mod run;
pub mod step;
pub mod workflow;

use std::sync::Arc;

use antfarm_core::gateway::CronGateway;
use antfarm_core::paths::AntfarmPaths;
use antfarm_core::state::AppState;

/// Initialize a shared `AppState` from the state root / database path.
pub fn init_state(db_path: Option<&str>, root: Option<&str>) -> AppState {
    let paths = match root {
        Some(r) => AntfarmPaths::with_root(r),
        None => AntfarmPaths::new(),
    };
    let db_path = db_path
        .map(str::to_string)
        .unwrap_or_else(|| paths.db_path().display().to_string());

    let db = antfarm_core::Database::open(&db_path).unwrap_or_else(|e| {
        eprintln!("Failed to open database '{}': {}", db_path, e);
        std::process::exit(1);
    });

    Arc::new(antfarm_core::AppStateInner::new(
        db,
        paths,
        CronGateway::from_env(),
    ))
}

/// Pretty-print a serializable value to stdout.
pub fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("Failed to encode output: {}", e),
    }
}
