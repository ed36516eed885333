//! Filesystem layout for Antfarm state.
//!
//! Everything lives under a single root (default `~/.openclaw/antfarm`):
//! the SQLite database plus one directory per installed workflow holding
//! that workflow's agent workspaces.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct AntfarmPaths {
    root: PathBuf,
}

impl AntfarmPaths {
    pub fn new() -> Self {
        let root = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".openclaw")
            .join("antfarm");
        Self { root }
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn db_path(&self) -> PathBuf {
        self.root.join("antfarm.db")
    }

    /// Default workspace directory for one agent of one installed workflow.
    /// An agent's declared `workspace` root takes precedence; see
    /// `workspace::agent_workspace_dir`.
    pub fn agent_workspace(&self, workflow_id: &str, agent_id: &str) -> PathBuf {
        self.root.join(workflow_id).join(agent_id)
    }
}

impl Default for AntfarmPaths {
    fn default() -> Self {
        Self::new()
    }
}
