//! The installed workflow definition: agents plus ordered steps.
//!
//! `WorkflowSpec` is immutable once installed. It is persisted as an opaque
//! JSON blob on the `workflows` row; step instances denormalize `type` and
//! `loop` so that spec edits never retroactively alter running work.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSpec {
    pub id: String,
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    pub agents: Vec<AgentSpec>,
    pub steps: Vec<StepDef>,
}

fn default_version() -> String {
    "1".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentSpec {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Workspace root override; defaults to `<state root>/<workflow>/<agent>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    #[default]
    Single,
    Loop,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Loop => "loop",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "single" => Some(Self::Single),
            "loop" => Some(Self::Loop),
            _ => None,
        }
    }
}

/// A single step definition within a workflow spec.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepDef {
    /// Unique within the spec.
    pub id: String,
    /// References an agent id declared in the same spec.
    pub agent: String,
    #[serde(default, rename = "type")]
    pub step_type: StepType,
    /// Present iff `step_type` is `loop`.
    #[serde(default, rename = "loop", skip_serializing_if = "Option::is_none")]
    pub loop_config: Option<LoopConfig>,
    /// Template string with `{{placeholder}}` slots.
    #[serde(default)]
    pub input: String,
    /// Human-readable contract, passed to the agent unaltered.
    #[serde(default)]
    pub expects: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_fail: Option<OnFailConfig>,
}

pub(crate) fn default_max_retries() -> u32 {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoopConfig {
    #[serde(default = "default_over")]
    pub over: String,
    #[serde(default = "default_completion")]
    pub completion: String,
    #[serde(default = "default_true")]
    pub fresh_session: bool,
    #[serde(default)]
    pub verify_each: bool,
    /// Must reference another step id when `verify_each` is true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify_step: Option<String>,
}

pub(crate) fn default_over() -> String {
    "stories".to_string()
}

pub(crate) fn default_completion() -> String {
    "all_done".to_string()
}

pub(crate) fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct OnFailConfig {
    /// Rewind to this step id on exhaustion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_step: Option<String>,
    /// Agent to notify; the run blocks and `escalate_to` lands in context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalate_to: Option<String>,
}

impl WorkflowSpec {
    pub fn step(&self, id: &str) -> Option<&StepDef> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn step_index(&self, id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == id)
    }

    pub fn agent(&self, id: &str) -> Option<&AgentSpec> {
        self.agents.iter().find(|a| a.id == id)
    }

    /// The first loop-typed step, if the workflow has one.
    pub fn loop_step(&self) -> Option<&StepDef> {
        self.steps.iter().find(|s| s.step_type == StepType::Loop)
    }
}
