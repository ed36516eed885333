use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::workflow::{LoopConfig, StepType};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Waiting,
    Pending,
    Running,
    Done,
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(Self::Waiting),
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One step of one run.
///
/// `step_type` and `loop_config` are denormalized copies of the definition
/// taken at run creation; `current_story_id` names the story a loop step is
/// working on (or holding for verification).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepInstance {
    pub id: String,
    pub run_id: String,
    pub step_index: u32,
    pub step_id: String,
    pub agent_id: String,
    pub status: StepStatus,
    pub retry_count: u32,
    pub step_type: StepType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loop_config: Option<LoopConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_story_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
