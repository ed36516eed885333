//! Progress-file bridge between agent workspaces and the engine.
//!
//! The developer agent writes `progress.txt` in its workspace; the engine
//! reads it on every claim for a run that has stories and injects it as the
//! `{{progress}}` template variable. On run completion the file is archived
//! under `archive/<run_id>/` beneath the same workspace. This is the only
//! path by which filesystem state influences scheduling decisions.

use std::fs;
use std::path::PathBuf;

use crate::error::CoreError;
use crate::models::workflow::WorkflowSpec;
use crate::paths::AntfarmPaths;

pub const NO_PROGRESS: &str = "(no progress yet)";

/// Resolve an agent's workspace from the installed spec: the agent's
/// declared `workspace` root when present, otherwise the default
/// `<state root>/<workflow>/<agent>` directory.
pub fn agent_workspace_dir(
    paths: &AntfarmPaths,
    spec: &WorkflowSpec,
    agent_id: &str,
) -> PathBuf {
    match spec.agent(agent_id).and_then(|a| a.workspace.as_deref()) {
        Some(root) => PathBuf::from(root),
        None => paths.agent_workspace(&spec.id, agent_id),
    }
}

pub fn progress_path(paths: &AntfarmPaths, spec: &WorkflowSpec, agent_id: &str) -> PathBuf {
    agent_workspace_dir(paths, spec, agent_id).join("progress.txt")
}

/// Read the designated agent's progress file.
///
/// A missing file is not an error; a torn concurrent read returns a
/// truncated string, tolerated as informational.
pub fn read_progress(paths: &AntfarmPaths, spec: &WorkflowSpec, agent_id: &str) -> String {
    fs::read_to_string(progress_path(paths, spec, agent_id))
        .unwrap_or_else(|_| NO_PROGRESS.to_string())
}

/// Move the progress file to `archive/<run_id>/progress.txt` in the same
/// workspace. No-op when the file does not exist.
pub fn archive_progress(
    paths: &AntfarmPaths,
    spec: &WorkflowSpec,
    agent_id: &str,
    run_id: &str,
) -> Result<(), CoreError> {
    let workspace = agent_workspace_dir(paths, spec, agent_id);
    let src = workspace.join("progress.txt");
    if !src.exists() {
        return Ok(());
    }
    let dir = workspace.join("archive").join(run_id);
    fs::create_dir_all(&dir)?;
    fs::rename(&src, dir.join("progress.txt"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::workflow::AgentSpec;

    fn spec(workspace: Option<&str>) -> WorkflowSpec {
        WorkflowSpec {
            id: "wf".to_string(),
            name: "Wf".to_string(),
            version: "1".to_string(),
            agents: vec![AgentSpec {
                id: "dev".to_string(),
                name: None,
                description: None,
                workspace: workspace.map(str::to_string),
            }],
            steps: vec![],
        }
    }

    #[test]
    fn test_default_workspace_is_positional() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = AntfarmPaths::with_root(tmp.path());
        assert_eq!(
            agent_workspace_dir(&paths, &spec(None), "dev"),
            tmp.path().join("wf").join("dev")
        );
    }

    #[test]
    fn test_declared_workspace_overrides_default() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = AntfarmPaths::with_root(tmp.path());
        let custom = tmp.path().join("elsewhere");
        let spec = spec(Some(&custom.display().to_string()));

        assert_eq!(agent_workspace_dir(&paths, &spec, "dev"), custom);

        std::fs::create_dir_all(&custom).unwrap();
        std::fs::write(custom.join("progress.txt"), "from override").unwrap();
        assert_eq!(read_progress(&paths, &spec, "dev"), "from override");

        archive_progress(&paths, &spec, "dev", "run-1").unwrap();
        let archived = custom.join("archive").join("run-1").join("progress.txt");
        assert_eq!(std::fs::read_to_string(archived).unwrap(), "from override");
    }

    #[test]
    fn test_missing_progress_file() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = AntfarmPaths::with_root(tmp.path());
        assert_eq!(read_progress(&paths, &spec(None), "dev"), NO_PROGRESS);
    }

    #[test]
    fn test_read_and_archive() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = AntfarmPaths::with_root(tmp.path());
        let spec = spec(None);
        let ws = paths.agent_workspace("wf", "dev");
        fs::create_dir_all(&ws).unwrap();
        fs::write(ws.join("progress.txt"), "US-001 shipped").unwrap();

        assert_eq!(read_progress(&paths, &spec, "dev"), "US-001 shipped");

        archive_progress(&paths, &spec, "dev", "run-1").unwrap();
        assert!(!ws.join("progress.txt").exists());
        let archived = ws.join("archive").join("run-1").join("progress.txt");
        assert_eq!(fs::read_to_string(archived).unwrap(), "US-001 shipped");

        // archiving again is a no-op
        archive_progress(&paths, &spec, "dev", "run-1").unwrap();
    }
}
