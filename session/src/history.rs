//! Bounded log of applied workbench transitions, for diagnostics and the
//! front-end's `history` view.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AttemptId, FeedbackActionKey, ModelIdentity};

/// Entries kept before the oldest are dropped.
pub const HISTORY_CAPACITY: usize = 256;

/// What changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransitionKind {
    ImageLoaded { file_name: String, bytes: usize },
    PromptChanged,
    Cleared,
    ComparisonStarted { teacher: AttemptId, student: AttemptId },
    RunSettled { model: ModelIdentity, status: String },
    StaleRunDiscarded { model: ModelIdentity, attempt: AttemptId },
    WinnerSelected { winner: Option<ModelIdentity> },
    FeedbackStarted { key: FeedbackActionKey, attempt: AttemptId },
    FeedbackSettled { key: FeedbackActionKey, attempt: AttemptId, success: bool },
    FeedbackExpired { key: FeedbackActionKey, attempt: AttemptId },
}

/// A single recorded transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// Monotonic sequence number within the session.
    pub seq: u64,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: TransitionKind,
}

#[derive(Debug, Clone, Default)]
pub struct TransitionLog {
    next_seq: u64,
    records: VecDeque<TransitionRecord>,
}

impl TransitionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, kind: TransitionKind) {
        if self.records.len() == HISTORY_CAPACITY {
            self.records.pop_front();
        }
        self.records.push_back(TransitionRecord {
            seq: self.next_seq,
            at: Utc::now(),
            kind,
        });
        self.next_seq += 1;
    }

    pub fn records(&self) -> impl Iterator<Item = &TransitionRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&TransitionRecord> {
        self.records.back()
    }
}
