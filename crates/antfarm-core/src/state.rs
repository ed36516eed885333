//! Shared application state for the CLI (and any future adapters).

use std::sync::Arc;

use crate::db::Database;
use crate::engine::StepEngine;
use crate::gateway::CronGateway;
use crate::paths::AntfarmPaths;
use crate::store::{RunStore, StoryStore, WorkflowStore};

pub struct AppStateInner {
    pub db: Database,
    pub paths: AntfarmPaths,
    pub workflow_store: WorkflowStore,
    pub run_store: RunStore,
    pub story_store: StoryStore,
    pub engine: StepEngine,
    pub gateway: CronGateway,
}

pub type AppState = Arc<AppStateInner>;

impl AppStateInner {
    pub fn new(db: Database, paths: AntfarmPaths, gateway: CronGateway) -> Self {
        Self {
            workflow_store: WorkflowStore::new(db.clone()),
            run_store: RunStore::new(db.clone()),
            story_store: StoryStore::new(db.clone()),
            engine: StepEngine::new(db.clone(), paths.clone()),
            gateway,
            paths,
            db,
        }
    }
}
