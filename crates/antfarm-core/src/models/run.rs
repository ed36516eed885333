use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::step::StepInstance;
use crate::models::story::Story;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Paused,
    Blocked,
    Completed,
    Canceled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Blocked => "blocked",
            Self::Completed => "completed",
            Self::Canceled => "canceled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "blocked" => Some(Self::Blocked),
            "completed" => Some(Self::Completed),
            "canceled" => Some(Self::Canceled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Canceled)
    }
}

/// One live execution of a workflow spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: String,
    pub workflow_id: String,
    pub task: String,
    pub lead_agent: String,
    pub session: String,
    pub status: RunStatus,
    pub current_step_index: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Status recorded on a terminal step completion.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StepResultStatus {
    #[default]
    Done,
    Retry,
    Blocked,
}

impl StepResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Done => "done",
            Self::Retry => "retry",
            Self::Blocked => "blocked",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "done" => Some(Self::Done),
            "retry" => Some(Self::Retry),
            "blocked" => Some(Self::Blocked),
            _ => None,
        }
    }
}

/// Immutable record of one terminal step completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResultRecord {
    pub seq: i64,
    pub run_id: String,
    pub step_id: String,
    pub agent_id: String,
    pub output: String,
    pub status: StepResultStatus,
    pub created_at: DateTime<Utc>,
}

/// A run together with its step instances and stories.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunDetail {
    #[serde(flatten)]
    pub run: Run,
    pub steps: Vec<StepInstance>,
    pub stories: Vec<Story>,
}
