//! Core data model shared by the comparison and feedback state machines.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// The two model backends under comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelIdentity {
    /// The large reference model.
    Teacher,
    /// The distilled model being trained.
    Student,
}

impl ModelIdentity {
    /// Both identities, in panel order.
    pub const ALL: [ModelIdentity; 2] = [ModelIdentity::Teacher, ModelIdentity::Student];

    /// The identity on the other side of the comparison.
    pub fn other(self) -> Self {
        match self {
            Self::Teacher => Self::Student,
            Self::Student => Self::Teacher,
        }
    }

    /// Wire name, also the endpoint path segment.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Teacher => "teacher",
            Self::Student => "student",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Self::Teacher => 0,
            Self::Student => 1,
        }
    }
}

impl fmt::Display for ModelIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelIdentity {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "teacher" | "t" => Ok(Self::Teacher),
            "student" | "s" => Ok(Self::Student),
            other => Err(SessionError::UnknownModel(other.to_string())),
        }
    }
}

/// Identifies one attempt within a logical slot (a model run or a feedback key).
///
/// Counters are per slot and only ever grow, so a completion carrying an
/// older attempt can always be told apart from the current one.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct AttemptId(pub u64);

impl AttemptId {
    pub(crate) fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One image + prompt pair, frozen for the lifetime of a comparison run.
#[derive(Debug, Clone, PartialEq)]
pub struct InputBundle {
    pub image: Vec<u8>,
    /// Original file name, forwarded so the backend can keep the extension.
    pub file_name: String,
    pub prompt: String,
}

impl InputBundle {
    pub fn new(image: Vec<u8>, file_name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            image,
            file_name: file_name.into(),
            prompt: prompt.into(),
        }
    }
}

/// Successful inference payload: `{"response": ..., "latency": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceOutput {
    pub response: String,
    /// Server-measured latency in seconds.
    pub latency: f64,
}

/// Per-model inference state for the current comparison run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ModelRun {
    #[default]
    Idle,
    Pending,
    Succeeded {
        response: String,
        latency: f64,
    },
    Failed {
        error: String,
    },
}

impl ModelRun {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn response(&self) -> Option<&str> {
        match self {
            Self::Succeeded { response, .. } => Some(response),
            _ => None,
        }
    }

    pub fn latency(&self) -> Option<f64> {
        match self {
            Self::Succeeded { latency, .. } => Some(*latency),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Failed { error } => Some(error),
            _ => None,
        }
    }

    /// Short status label used in logs and the transition history.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Pending => "pending",
            Self::Succeeded { .. } => "succeeded",
            Self::Failed { .. } => "failed",
        }
    }
}

/// The five independent feedback actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackActionKey {
    TeacherPass,
    TeacherFail,
    StudentPass,
    StudentFail,
    Preference,
}

impl FeedbackActionKey {
    pub const ALL: [FeedbackActionKey; 5] = [
        Self::TeacherPass,
        Self::TeacherFail,
        Self::StudentPass,
        Self::StudentFail,
        Self::Preference,
    ];

    /// Key for a single-sided label, `<model>_<pass|fail>`.
    pub fn label(model: ModelIdentity, is_pass: bool) -> Self {
        match (model, is_pass) {
            (ModelIdentity::Teacher, true) => Self::TeacherPass,
            (ModelIdentity::Teacher, false) => Self::TeacherFail,
            (ModelIdentity::Student, true) => Self::StudentPass,
            (ModelIdentity::Student, false) => Self::StudentFail,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::TeacherPass => "teacher_pass",
            Self::TeacherFail => "teacher_fail",
            Self::StudentPass => "student_pass",
            Self::StudentFail => "student_fail",
            Self::Preference => "preference",
        }
    }
}

impl fmt::Display for FeedbackActionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transient status of one feedback action. Absence from the status map
/// means "absent".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FeedbackStatus {
    Pending,
    Success,
    Error { message: String },
}

impl FeedbackStatus {
    /// Whether the action has resolved (and an expiry timer applies).
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// The human's pairwise judgment, built up before submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreferenceSelection {
    pub winner: Option<ModelIdentity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

impl PreferenceSelection {
    pub fn loser(&self) -> Option<ModelIdentity> {
        self.winner.map(ModelIdentity::other)
    }
}

/// Backend health probe payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub model_loaded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tensor_parallel_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_memory_utilization: Option<f64>,
}

impl HealthStatus {
    /// Backend reachable, reporting `ok`, and holding a loaded model.
    pub fn is_ready(&self) -> bool {
        self.status == "ok" && self.model_loaded
    }
}
