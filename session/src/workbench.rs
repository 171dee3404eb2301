//! Workbench: the single state container behind the comparison page.
//!
//! All mutation goes through the named operations below; rendering code
//! only ever sees a [`WorkbenchSnapshot`]. The container is synchronous and
//! owns no tasks; [`SessionDriver`](crate::SessionDriver) pairs it with the
//! network and the timers.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::backend::{DpoFeedback, SftFeedback};
use crate::comparison::{ComparisonState, ComparisonTicket, Settlement};
use crate::error::{RequestError, SessionError};
use crate::feedback::FeedbackSession;
use crate::history::{TransitionKind, TransitionLog};
use crate::types::{
    AttemptId, FeedbackActionKey, FeedbackStatus, InferenceOutput, InputBundle, ModelIdentity,
    ModelRun, PreferenceSelection,
};

/// The image currently loaded, before it is frozen into a bundle.
#[derive(Debug, Clone)]
struct LoadedImage {
    bytes: Vec<u8>,
    file_name: String,
}

/// Read-only view of the workbench for rendering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkbenchSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageSummary>,
    pub prompt: String,
    pub teacher: ModelRun,
    pub student: ModelRun,
    pub busy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_banner: Option<String>,
    pub feedback: BTreeMap<FeedbackActionKey, FeedbackStatus>,
    pub selection: PreferenceSelection,
    pub can_run: bool,
    pub preference_enabled: bool,
    pub teacher_label_enabled: bool,
    pub student_label_enabled: bool,
}

impl WorkbenchSnapshot {
    pub fn run(&self, model: ModelIdentity) -> &ModelRun {
        match model {
            ModelIdentity::Teacher => &self.teacher,
            ModelIdentity::Student => &self.student,
        }
    }

    pub fn feedback_status(&self, key: FeedbackActionKey) -> Option<&FeedbackStatus> {
        self.feedback.get(&key)
    }

    pub fn label_enabled(&self, model: ModelIdentity) -> bool {
        match model {
            ModelIdentity::Teacher => self.teacher_label_enabled,
            ModelIdentity::Student => self.student_label_enabled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSummary {
    pub file_name: String,
    pub bytes: usize,
}

/// Explicit state container for one workbench session.
#[derive(Debug, Default)]
pub struct Workbench {
    image: Option<LoadedImage>,
    prompt: String,
    /// Bundle of the latest comparison run; feedback refers to this input,
    /// not to whatever the prompt box holds now.
    active: Option<Arc<InputBundle>>,
    comparison: ComparisonState,
    feedback: FeedbackSession,
    selection: PreferenceSelection,
    history: TransitionLog,
}

impl Workbench {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    // ── Input ────────────────────────────────────────────────────────────

    /// Accept a new image. Results, selection and banner of the previous
    /// input are discarded; feedback statuses are left to settle.
    pub fn load_image(&mut self, bytes: Vec<u8>, file_name: impl Into<String>) {
        let file_name = file_name.into();
        let len = bytes.len();
        self.image = Some(LoadedImage {
            bytes,
            file_name: file_name.clone(),
        });
        self.reset_results();
        info!(%file_name, bytes = len, "Image loaded");
        self.history.record(TransitionKind::ImageLoaded {
            file_name,
            bytes: len,
        });
    }

    pub fn set_prompt(&mut self, prompt: impl Into<String>) {
        self.prompt = prompt.into();
        self.history.record(TransitionKind::PromptChanged);
    }

    /// Unload the image and reset everything derived from it.
    pub fn clear(&mut self) {
        self.image = None;
        self.reset_results();
        self.history.record(TransitionKind::Cleared);
    }

    fn reset_results(&mut self) {
        self.comparison.reset();
        self.selection = PreferenceSelection::default();
        self.active = None;
    }

    // ── Comparison ───────────────────────────────────────────────────────

    /// Freeze the current image + prompt and put both runs in flight.
    pub fn begin_comparison(
        &mut self,
    ) -> Result<(Arc<InputBundle>, ComparisonTicket), SessionError> {
        let image = self.image.as_ref().ok_or(SessionError::MissingImage)?;
        if self.prompt.trim().is_empty() {
            return Err(SessionError::EmptyPrompt);
        }
        let bundle = Arc::new(InputBundle::new(
            image.bytes.clone(),
            image.file_name.clone(),
            self.prompt.clone(),
        ));
        self.active = Some(Arc::clone(&bundle));
        self.selection = PreferenceSelection::default();
        let ticket = self.comparison.begin();
        self.history.record(TransitionKind::ComparisonStarted {
            teacher: ticket.teacher,
            student: ticket.student,
        });
        Ok((bundle, ticket))
    }

    pub fn apply_inference(
        &mut self,
        model: ModelIdentity,
        attempt: AttemptId,
        result: Result<InferenceOutput, RequestError>,
    ) -> bool {
        match self.comparison.settle(model, attempt, result) {
            Settlement::Applied => {
                let status = self.comparison.run(model).label().to_string();
                self.history
                    .record(TransitionKind::RunSettled { model, status });
                true
            }
            Settlement::Stale => {
                self.history
                    .record(TransitionKind::StaleRunDiscarded { model, attempt });
                false
            }
        }
    }

    // ── Preference selection ─────────────────────────────────────────────

    pub fn select_winner(&mut self, winner: ModelIdentity) -> Result<(), SessionError> {
        if !self.comparison.both_succeeded() {
            return Err(SessionError::PreferenceUnavailable);
        }
        self.selection.winner = Some(winner);
        self.history.record(TransitionKind::WinnerSelected {
            winner: Some(winner),
        });
        Ok(())
    }

    pub fn clear_winner(&mut self) {
        self.selection.winner = None;
        self.history
            .record(TransitionKind::WinnerSelected { winner: None });
    }

    /// Set the optional rationale; blank text clears it.
    pub fn set_rationale(&mut self, rationale: &str) {
        let trimmed = rationale.trim();
        self.selection.rationale = if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        };
    }

    // ── Feedback ─────────────────────────────────────────────────────────

    /// Start a pass/fail label for `model`'s response.
    pub fn begin_label(
        &mut self,
        model: ModelIdentity,
        is_pass: bool,
    ) -> Result<(FeedbackActionKey, AttemptId, SftFeedback), SessionError> {
        let response = self
            .comparison
            .run(model)
            .response()
            .ok_or(SessionError::RunNotSucceeded(model))?
            .to_string();
        let bundle = self
            .active
            .clone()
            .ok_or(SessionError::RunNotSucceeded(model))?;

        let key = FeedbackActionKey::label(model, is_pass);
        let attempt = self.feedback.begin(key);
        self.history
            .record(TransitionKind::FeedbackStarted { key, attempt });
        Ok((
            key,
            attempt,
            SftFeedback {
                bundle,
                model,
                response,
                is_pass,
            },
        ))
    }

    /// Start a preference submission from the current selection.
    pub fn begin_preference(&mut self) -> Result<(AttemptId, DpoFeedback), SessionError> {
        let winner = self.selection.winner.ok_or(SessionError::NoWinnerSelected)?;
        let loser = winner.other();
        let (Some(response_winner), Some(response_loser), Some(bundle)) = (
            self.comparison.run(winner).response(),
            self.comparison.run(loser).response(),
            self.active.clone(),
        ) else {
            return Err(SessionError::PreferenceUnavailable);
        };
        if self.preference_saved() {
            return Err(SessionError::AlreadySaved);
        }

        let feedback = DpoFeedback {
            bundle,
            winner,
            loser,
            response_winner: response_winner.to_string(),
            response_loser: response_loser.to_string(),
            comment: self.selection.rationale.clone(),
        };
        let key = FeedbackActionKey::Preference;
        let attempt = self.feedback.begin(key);
        self.history
            .record(TransitionKind::FeedbackStarted { key, attempt });
        Ok((attempt, feedback))
    }

    pub fn apply_feedback(
        &mut self,
        key: FeedbackActionKey,
        attempt: AttemptId,
        result: Result<(), RequestError>,
    ) -> bool {
        let success = result.is_ok();
        let applied = self.feedback.settle(key, attempt, result);
        if applied {
            self.history.record(TransitionKind::FeedbackSettled {
                key,
                attempt,
                success,
            });
        }
        applied
    }

    pub fn expire_feedback(&mut self, key: FeedbackActionKey, attempt: AttemptId) -> bool {
        let expired = self.feedback.expire(key, attempt);
        if expired {
            self.history
                .record(TransitionKind::FeedbackExpired { key, attempt });
        }
        expired
    }

    // ── Queries ──────────────────────────────────────────────────────────

    pub fn run(&self, model: ModelIdentity) -> &ModelRun {
        self.comparison.run(model)
    }

    pub fn is_busy(&self) -> bool {
        self.comparison.is_busy()
    }

    /// Gate for the run trigger.
    pub fn can_run(&self) -> bool {
        self.image.is_some() && !self.prompt.trim().is_empty() && !self.is_busy()
    }

    pub fn label_enabled(&self, model: ModelIdentity) -> bool {
        self.comparison.run(model).is_succeeded()
    }

    /// Gate for the preference submit control: a winner is selected, both
    /// runs succeeded, and the preference has not already been saved.
    pub fn preference_enabled(&self) -> bool {
        self.selection.winner.is_some()
            && self.comparison.both_succeeded()
            && !self.preference_saved()
    }

    fn preference_saved(&self) -> bool {
        self.feedback
            .status(FeedbackActionKey::Preference)
            .is_some_and(FeedbackStatus::is_success)
    }

    pub fn feedback(&self) -> &FeedbackSession {
        &self.feedback
    }

    pub fn selection(&self) -> &PreferenceSelection {
        &self.selection
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Bundle of the loaded image with an ad-hoc `prompt`, outside the
    /// comparison flow. The workbench prompt is not consulted.
    pub fn bundle_with_prompt(&self, prompt: &str) -> Result<InputBundle, SessionError> {
        let image = self.image.as_ref().ok_or(SessionError::MissingImage)?;
        if prompt.trim().is_empty() {
            return Err(SessionError::EmptyPrompt);
        }
        Ok(InputBundle::new(
            image.bytes.clone(),
            image.file_name.clone(),
            prompt,
        ))
    }

    pub fn history(&self) -> &TransitionLog {
        &self.history
    }

    pub fn snapshot(&self) -> WorkbenchSnapshot {
        WorkbenchSnapshot {
            image: self.image.as_ref().map(|img| ImageSummary {
                file_name: img.file_name.clone(),
                bytes: img.bytes.len(),
            }),
            prompt: self.prompt.clone(),
            teacher: self.comparison.run(ModelIdentity::Teacher).clone(),
            student: self.comparison.run(ModelIdentity::Student).clone(),
            busy: self.is_busy(),
            error_banner: self.comparison.banner(),
            feedback: self.feedback.statuses().clone(),
            selection: self.selection.clone(),
            can_run: self.can_run(),
            preference_enabled: self.preference_enabled(),
            teacher_label_enabled: self.label_enabled(ModelIdentity::Teacher),
            student_label_enabled: self.label_enabled(ModelIdentity::Student),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_workbench() -> (Workbench, ComparisonTicket) {
        let mut wb = Workbench::new("describe traffic");
        wb.load_image(vec![1, 2, 3], "a.png");
        let (_, ticket) = wb.begin_comparison().unwrap();
        wb.apply_inference(
            ModelIdentity::Teacher,
            ticket.teacher,
            Ok(InferenceOutput {
                response: "text1".into(),
                latency: 1.2,
            }),
        );
        wb.apply_inference(
            ModelIdentity::Student,
            ticket.student,
            Ok(InferenceOutput {
                response: "text2".into(),
                latency: 0.8,
            }),
        );
        (wb, ticket)
    }

    #[test]
    fn test_begin_requires_image_and_prompt() {
        let mut wb = Workbench::new("");
        assert_eq!(wb.begin_comparison().unwrap_err(), SessionError::MissingImage);
        wb.load_image(vec![0], "x.jpg");
        assert_eq!(wb.begin_comparison().unwrap_err(), SessionError::EmptyPrompt);
        wb.set_prompt("   ");
        assert!(!wb.can_run());
        assert!(!wb.is_busy());
    }

    #[test]
    fn test_run_gate_follows_busy() {
        let mut wb = Workbench::new("describe traffic");
        wb.load_image(vec![0], "x.jpg");
        assert!(wb.can_run());
        wb.begin_comparison().unwrap();
        assert!(!wb.can_run());
        assert!(wb.snapshot().busy);
    }

    #[test]
    fn test_snapshot_after_both_succeed() {
        let (wb, _) = ready_workbench();
        let snap = wb.snapshot();
        assert!(!snap.busy);
        assert!(snap.error_banner.is_none());
        assert_eq!(snap.teacher.response(), Some("text1"));
        assert_eq!(snap.student.latency(), Some(0.8));
        assert!(snap.teacher_label_enabled && snap.student_label_enabled);
        assert!(!snap.preference_enabled);
    }

    #[test]
    fn test_label_rejected_without_success() {
        let mut wb = Workbench::new("p");
        wb.load_image(vec![0], "x.jpg");
        wb.begin_comparison().unwrap();
        let err = wb.begin_label(ModelIdentity::Teacher, true).unwrap_err();
        assert_eq!(err, SessionError::RunNotSucceeded(ModelIdentity::Teacher));
        assert!(wb.feedback().statuses().is_empty());
    }

    #[test]
    fn test_label_carries_response_and_bundle() {
        let (mut wb, _) = ready_workbench();
        wb.set_prompt("edited after the run");
        let (key, attempt, sft) = wb.begin_label(ModelIdentity::Student, false).unwrap();
        assert_eq!(key, FeedbackActionKey::StudentFail);
        assert_eq!(attempt, AttemptId(1));
        assert_eq!(sft.response, "text2");
        assert!(!sft.is_pass);
        assert_eq!(sft.bundle.prompt, "describe traffic");
        assert_eq!(
            wb.feedback().status(key),
            Some(&FeedbackStatus::Pending)
        );
    }

    #[test]
    fn test_preference_gating() {
        let (mut wb, _) = ready_workbench();
        assert_eq!(
            wb.begin_preference().unwrap_err(),
            SessionError::NoWinnerSelected
        );

        wb.select_winner(ModelIdentity::Student).unwrap();
        wb.set_rationale("  more concise ");
        assert!(wb.preference_enabled());

        let (attempt, dpo) = wb.begin_preference().unwrap();
        assert_eq!(dpo.winner, ModelIdentity::Student);
        assert_eq!(dpo.loser, ModelIdentity::Teacher);
        assert_eq!(dpo.response_winner, "text2");
        assert_eq!(dpo.response_loser, "text1");
        assert_eq!(dpo.comment.as_deref(), Some("more concise"));
        // Pending does not disable the control.
        assert!(wb.preference_enabled());

        wb.apply_feedback(
            FeedbackActionKey::Preference,
            attempt,
            Err(RequestError::Transport("reset".into())),
        );
        assert!(wb.preference_enabled());

        let (retry, _) = wb.begin_preference().unwrap();
        wb.apply_feedback(FeedbackActionKey::Preference, retry, Ok(()));
        assert!(!wb.preference_enabled());
        assert_eq!(wb.begin_preference().unwrap_err(), SessionError::AlreadySaved);

        wb.expire_feedback(FeedbackActionKey::Preference, retry);
        assert!(wb.preference_enabled());
    }

    #[test]
    fn test_select_winner_requires_both_runs() {
        let mut wb = Workbench::new("p");
        wb.load_image(vec![0], "x.jpg");
        let (_, ticket) = wb.begin_comparison().unwrap();
        wb.apply_inference(
            ModelIdentity::Teacher,
            ticket.teacher,
            Ok(InferenceOutput {
                response: "only one".into(),
                latency: 1.0,
            }),
        );
        assert_eq!(
            wb.select_winner(ModelIdentity::Teacher).unwrap_err(),
            SessionError::PreferenceUnavailable
        );
    }

    #[test]
    fn test_new_image_resets_results_but_not_feedback() {
        let (mut wb, _) = ready_workbench();
        wb.select_winner(ModelIdentity::Teacher).unwrap();
        let (key, attempt, _) = wb.begin_label(ModelIdentity::Teacher, true).unwrap();

        wb.load_image(vec![9, 9], "b.png");
        let snap = wb.snapshot();
        assert_eq!(snap.teacher, ModelRun::Idle);
        assert_eq!(snap.student, ModelRun::Idle);
        assert!(snap.selection.winner.is_none());
        assert!(snap.error_banner.is_none());
        assert_eq!(snap.feedback_status(key), Some(&FeedbackStatus::Pending));

        assert!(wb.apply_feedback(key, attempt, Ok(())));
        assert_eq!(
            wb.snapshot().feedback_status(key),
            Some(&FeedbackStatus::Success)
        );
    }

    #[test]
    fn test_stale_run_after_clear_is_discarded() {
        let mut wb = Workbench::new("p");
        wb.load_image(vec![0], "x.jpg");
        let (_, ticket) = wb.begin_comparison().unwrap();
        wb.clear();
        assert!(!wb.apply_inference(
            ModelIdentity::Student,
            ticket.student,
            Ok(InferenceOutput {
                response: "late".into(),
                latency: 2.0,
            }),
        ));
        assert_eq!(*wb.run(ModelIdentity::Student), ModelRun::Idle);
        assert!(matches!(
            wb.history().last().map(|r| &r.kind),
            Some(TransitionKind::StaleRunDiscarded { .. })
        ));
    }

    #[test]
    fn test_bundle_with_prompt_ignores_workbench_prompt() {
        let mut wb = Workbench::new("");
        assert_eq!(
            wb.bundle_with_prompt("how many lanes?").unwrap_err(),
            SessionError::MissingImage
        );

        wb.load_image(vec![7, 7], "c.jpg");
        let bundle = wb.bundle_with_prompt("how many lanes?").unwrap();
        assert_eq!(bundle.prompt, "how many lanes?");
        assert_eq!(bundle.file_name, "c.jpg");
        assert_eq!(bundle.image, vec![7, 7]);
        assert_eq!(
            wb.bundle_with_prompt("  ").unwrap_err(),
            SessionError::EmptyPrompt
        );
    }
}
