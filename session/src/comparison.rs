//! Comparison Orchestrator: two independent model runs over one input.
//!
//! ```text
//!              begin()                 settle(Ok)
//!   Idle ───────────────► Pending ─────────────────► Succeeded
//!    ▲                      │  │      settle(Err)
//!    │       reset()        │  └────────────────────► Failed ──► banner += "<model> error: .."
//!    └──────────────────────┘
//! ```
//!
//! Each slot carries its own attempt counter. `begin()` and `reset()` bump
//! both counters, so a completion from a superseded run no longer matches
//! its slot and is discarded instead of overwriting the fresh state.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::RequestError;
use crate::types::{AttemptId, InferenceOutput, ModelIdentity, ModelRun};

/// Separator between accumulated error messages in the banner.
pub const BANNER_SEPARATOR: &str = " | ";

/// Attempt ids handed out by [`ComparisonState::begin`], one per model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonTicket {
    pub teacher: AttemptId,
    pub student: AttemptId,
}

impl ComparisonTicket {
    pub fn attempt(&self, model: ModelIdentity) -> AttemptId {
        match model {
            ModelIdentity::Teacher => self.teacher,
            ModelIdentity::Student => self.student,
        }
    }
}

/// What happened to a completion handed to [`ComparisonState::settle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// The run slot was updated.
    Applied,
    /// The completion belonged to a superseded attempt and was dropped.
    Stale,
}

#[derive(Debug, Clone, Default)]
struct RunSlot {
    run: ModelRun,
    attempt: AttemptId,
}

/// Run state for both models plus the shared error banner.
#[derive(Debug, Clone, Default)]
pub struct ComparisonState {
    slots: [RunSlot; 2],
    banner: Vec<String>,
}

impl ComparisonState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a run: both slots go to `Pending` under fresh attempts and the
    /// banner is cleared.
    pub fn begin(&mut self) -> ComparisonTicket {
        self.banner.clear();
        for slot in &mut self.slots {
            slot.attempt = slot.attempt.next();
            slot.run = ModelRun::Pending;
        }
        let ticket = ComparisonTicket {
            teacher: self.slot(ModelIdentity::Teacher).attempt,
            student: self.slot(ModelIdentity::Student).attempt,
        };
        info!(
            teacher_attempt = ticket.teacher.0,
            student_attempt = ticket.student.0,
            "Comparison run started"
        );
        ticket
    }

    /// Apply one model's completion if it belongs to that slot's latest
    /// attempt.
    pub fn settle(
        &mut self,
        model: ModelIdentity,
        attempt: AttemptId,
        result: Result<InferenceOutput, RequestError>,
    ) -> Settlement {
        let slot = &mut self.slots[model.index()];
        if slot.attempt != attempt || !slot.run.is_pending() {
            debug!(
                %model,
                attempt = attempt.0,
                current = slot.attempt.0,
                "Discarding stale inference completion"
            );
            return Settlement::Stale;
        }

        match result {
            Ok(output) => {
                info!(%model, latency = output.latency, "Model run succeeded");
                slot.run = ModelRun::Succeeded {
                    response: output.response,
                    latency: output.latency,
                };
            }
            Err(err) => {
                let message = format!("{model} error: {err}");
                warn!(%model, kind = err.kind(), "{message}");
                self.banner.push(message.clone());
                slot.run = ModelRun::Failed { error: message };
            }
        }
        Settlement::Applied
    }

    /// Drop both runs back to `Idle` and invalidate any in-flight attempts.
    pub fn reset(&mut self) {
        self.banner.clear();
        for slot in &mut self.slots {
            slot.attempt = slot.attempt.next();
            slot.run = ModelRun::Idle;
        }
    }

    pub fn run(&self, model: ModelIdentity) -> &ModelRun {
        &self.slot(model).run
    }

    /// The attempt a completion must carry to be applied to `model`.
    pub fn current_attempt(&self, model: ModelIdentity) -> AttemptId {
        self.slot(model).attempt
    }

    /// True while either model of the current run is outstanding.
    pub fn is_busy(&self) -> bool {
        self.slots.iter().any(|s| s.run.is_pending())
    }

    pub fn both_succeeded(&self) -> bool {
        self.slots.iter().all(|s| s.run.is_succeeded())
    }

    /// Accumulated error messages, `None` when there are none.
    pub fn banner(&self) -> Option<String> {
        if self.banner.is_empty() {
            None
        } else {
            Some(self.banner.join(BANNER_SEPARATOR))
        }
    }

    fn slot(&self, model: ModelIdentity) -> &RunSlot {
        &self.slots[model.index()]
    }
}
