//! YAML schema for workflow manifests.
//!
//! A manifest declares the agents and the step pipeline:
//!
//! ```yaml
//! id: feature-dev
//! name: "Feature Development"
//! version: "1"
//!
//! agents:
//!   - id: planner
//!   - id: dev
//!   - id: verifier
//!
//! steps:
//!   - id: plan
//!     agent: planner
//!     input: "Plan the task: {{task}}"
//!     expects: "STORIES_JSON with the ordered user stories"
//!
//!   - id: implement
//!     agent: dev
//!     type: loop
//!     loop:
//!       over: stories
//!       completion: all_done
//!       verify_each: true
//!       verify_step: verify
//!     input: "Implement {{current_story_id}}.\n{{current_story}}"
//!     on_fail:
//!       retry_step: plan
//!
//!   - id: verify
//!     agent: verifier
//!     input: "Check {{current_story_id}} against its criteria."
//! ```
//!
//! Manifests are authored in `snake_case`; [`WorkflowManifest::into_spec`]
//! validates cross-references and converts to the internal camelCase model.

use serde::Deserialize;

use crate::error::CoreError;
use crate::models::workflow::{
    default_completion, default_max_retries, default_over, default_true, AgentSpec, LoopConfig,
    OnFailConfig, StepDef, StepType, WorkflowSpec,
};

#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowManifest {
    pub id: String,
    pub name: String,
    #[serde(default = "default_manifest_version")]
    pub version: String,
    #[serde(default)]
    pub agents: Vec<ManifestAgent>,
    pub steps: Vec<ManifestStep>,
}

fn default_manifest_version() -> String {
    "1".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestAgent {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub workspace: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestStep {
    pub id: String,
    pub agent: String,
    #[serde(default, rename = "type")]
    pub step_type: StepType,
    #[serde(default, rename = "loop")]
    pub loop_config: Option<ManifestLoop>,
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub expects: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub on_fail: Option<ManifestOnFail>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestLoop {
    #[serde(default = "default_over")]
    pub over: String,
    #[serde(default = "default_completion")]
    pub completion: String,
    #[serde(default = "default_true")]
    pub fresh_session: bool,
    #[serde(default)]
    pub verify_each: bool,
    #[serde(default)]
    pub verify_step: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ManifestOnFail {
    #[serde(default)]
    pub retry_step: Option<String>,
    /// Overrides the step-level retry budget when present.
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub on_exhausted: Option<ManifestOnExhausted>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ManifestOnExhausted {
    #[serde(default)]
    pub escalate_to: Option<String>,
}

impl WorkflowManifest {
    /// Parse a workflow manifest from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, CoreError> {
        serde_yaml::from_str(yaml)
            .map_err(|e| CoreError::Validation(format!("Failed to parse workflow manifest: {}", e)))
    }

    /// Load a workflow manifest from a file path.
    pub fn from_file(path: &str) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CoreError::Io(format!("Failed to read manifest file '{}': {}", path, e))
        })?;
        Self::from_yaml(&content)
    }

    /// Validate cross-references and convert to the internal spec model.
    pub fn into_spec(self) -> Result<WorkflowSpec, CoreError> {
        self.validate()?;

        let agents = self
            .agents
            .into_iter()
            .map(|a| AgentSpec {
                id: a.id,
                name: a.name,
                description: a.description,
                workspace: a.workspace,
            })
            .collect();

        let steps = self
            .steps
            .into_iter()
            .map(|s| {
                let max_retries = s
                    .on_fail
                    .as_ref()
                    .and_then(|f| f.max_retries)
                    .unwrap_or(s.max_retries);
                let on_fail = s.on_fail.map(|f| OnFailConfig {
                    retry_step: f.retry_step,
                    escalate_to: f.on_exhausted.and_then(|e| e.escalate_to),
                });
                // drop empty on_fail blocks so the blob round-trips cleanly
                let on_fail = on_fail.filter(|f| f.retry_step.is_some() || f.escalate_to.is_some());
                StepDef {
                    id: s.id,
                    agent: s.agent,
                    step_type: s.step_type,
                    loop_config: s.loop_config.map(|l| LoopConfig {
                        over: l.over,
                        completion: l.completion,
                        fresh_session: l.fresh_session,
                        verify_each: l.verify_each,
                        verify_step: l.verify_step,
                    }),
                    input: s.input,
                    expects: s.expects,
                    max_retries,
                    on_fail,
                }
            })
            .collect();

        Ok(WorkflowSpec {
            id: self.id,
            name: self.name,
            version: self.version,
            agents,
            steps,
        })
    }

    fn validate(&self) -> Result<(), CoreError> {
        if self.steps.is_empty() {
            return Err(CoreError::Validation(format!(
                "workflow '{}' declares no steps",
                self.id
            )));
        }

        let mut agent_ids = std::collections::HashSet::new();
        for agent in &self.agents {
            if !agent_ids.insert(agent.id.as_str()) {
                return Err(CoreError::Validation(format!(
                    "duplicate agent id '{}'",
                    agent.id
                )));
            }
        }

        let mut step_ids = std::collections::HashSet::new();
        for step in &self.steps {
            if !step_ids.insert(step.id.as_str()) {
                return Err(CoreError::Validation(format!(
                    "duplicate step id '{}'",
                    step.id
                )));
            }
        }

        for step in &self.steps {
            if !agent_ids.contains(step.agent.as_str()) {
                return Err(CoreError::Validation(format!(
                    "step '{}' references unknown agent '{}'",
                    step.id, step.agent
                )));
            }

            match (step.step_type, &step.loop_config) {
                (StepType::Loop, None) => {
                    return Err(CoreError::Validation(format!(
                        "loop step '{}' is missing its loop block",
                        step.id
                    )));
                }
                (StepType::Single, Some(_)) => {
                    return Err(CoreError::Validation(format!(
                        "step '{}' declares a loop block but is not of type loop",
                        step.id
                    )));
                }
                _ => {}
            }

            if let Some(lc) = &step.loop_config {
                if lc.over != "stories" {
                    return Err(CoreError::Validation(format!(
                        "loop step '{}': unsupported loop.over '{}'",
                        step.id, lc.over
                    )));
                }
                if lc.completion != "all_done" {
                    return Err(CoreError::Validation(format!(
                        "loop step '{}': unsupported loop.completion '{}'",
                        step.id, lc.completion
                    )));
                }
                if lc.verify_each {
                    match &lc.verify_step {
                        None => {
                            return Err(CoreError::Validation(format!(
                                "loop step '{}' has verify_each but no verify_step",
                                step.id
                            )));
                        }
                        Some(v) if v == &step.id => {
                            return Err(CoreError::Validation(format!(
                                "loop step '{}' cannot verify itself",
                                step.id
                            )));
                        }
                        Some(v) if !step_ids.contains(v.as_str()) => {
                            return Err(CoreError::Validation(format!(
                                "loop step '{}': verify_step '{}' does not exist",
                                step.id, v
                            )));
                        }
                        _ => {}
                    }
                }
            }

            if let Some(on_fail) = &step.on_fail {
                if let Some(target) = &on_fail.retry_step {
                    if !step_ids.contains(target.as_str()) {
                        return Err(CoreError::Validation(format!(
                            "step '{}': on_fail.retry_step '{}' does not exist",
                            step.id, target
                        )));
                    }
                }
                if let Some(exhausted) = &on_fail.on_exhausted {
                    if let Some(agent) = &exhausted.escalate_to {
                        if !agent_ids.contains(agent.as_str()) {
                            return Err(CoreError::Validation(format!(
                                "step '{}': escalate_to '{}' is not a declared agent",
                                step.id, agent
                            )));
                        }
                    }
                }
            }
        }

        Ok(())
    }
}
