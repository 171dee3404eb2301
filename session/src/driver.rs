//! Session driver. Binds the [`Workbench`] to the network and the clock.
//!
//! The driver is the only owner of workbench state. User operations mutate
//! it synchronously and spawn the matching request task; every task reports
//! back through one mpsc channel, and the driver applies each
//! [`SessionEvent`] exactly once when it is received. Nothing else touches
//! the state, so no locks are involved.
//!
//! ```text
//!  user op ──► Workbench (sync) ──► tokio::spawn(request) ──┐
//!                    ▲                                      │
//!                    └──────── apply(SessionEvent) ◄────────┘ (mpsc)
//! ```
//!
//! After every applied change a fresh [`WorkbenchSnapshot`] is published on
//! a `watch` channel for renderers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

use crate::backend::SharedBackend;
use crate::error::{RequestError, SessionError};
use crate::feedback::{ExpiryTimers, DEFAULT_FEEDBACK_EXPIRY};
use crate::types::{AttemptId, FeedbackActionKey, InferenceOutput, ModelIdentity};
use crate::workbench::{Workbench, WorkbenchSnapshot};

/// Completion of an asynchronous operation, tagged with the attempt it
/// belongs to.
#[derive(Debug)]
pub enum SessionEvent {
    InferenceSettled {
        model: ModelIdentity,
        attempt: AttemptId,
        result: Result<InferenceOutput, RequestError>,
    },
    FeedbackSettled {
        key: FeedbackActionKey,
        attempt: AttemptId,
        result: Result<(), RequestError>,
    },
    FeedbackExpired {
        key: FeedbackActionKey,
        attempt: AttemptId,
    },
}

/// Tunables for a [`SessionDriver`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// How long a settled feedback status stays visible.
    pub feedback_expiry: Duration,
    /// Prompt pre-filled into the workbench.
    pub initial_prompt: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            feedback_expiry: DEFAULT_FEEDBACK_EXPIRY,
            initial_prompt: String::new(),
        }
    }
}

pub struct SessionDriver {
    session_id: Uuid,
    workbench: Workbench,
    backend: SharedBackend,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    timers: ExpiryTimers,
    snapshots: watch::Sender<WorkbenchSnapshot>,
}

impl SessionDriver {
    /// Must be called inside a tokio runtime; request tasks are spawned on it.
    pub fn new(backend: SharedBackend, options: SessionOptions) -> Self {
        let workbench = Workbench::new(options.initial_prompt);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (snapshots, _) = watch::channel(workbench.snapshot());
        let session_id = Uuid::new_v4();
        info!(%session_id, expiry_ms = options.feedback_expiry.as_millis() as u64, "Workbench session created");
        Self {
            session_id,
            workbench,
            backend,
            events_tx,
            events_rx,
            timers: ExpiryTimers::new(options.feedback_expiry),
            snapshots,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn workbench(&self) -> &Workbench {
        &self.workbench
    }

    pub fn snapshot(&self) -> WorkbenchSnapshot {
        self.workbench.snapshot()
    }

    /// Receive a snapshot after every applied change.
    pub fn subscribe(&self) -> watch::Receiver<WorkbenchSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn backend(&self) -> &SharedBackend {
        &self.backend
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.workbench.snapshot());
    }

    // ── Input ────────────────────────────────────────────────────────────

    pub fn load_image(&mut self, bytes: Vec<u8>, file_name: impl Into<String>) {
        self.workbench.load_image(bytes, file_name);
        self.publish();
    }

    pub fn set_prompt(&mut self, prompt: impl Into<String>) {
        self.workbench.set_prompt(prompt);
        self.publish();
    }

    pub fn clear(&mut self) {
        self.workbench.clear();
        self.publish();
    }

    // ── Comparison Orchestrator ──────────────────────────────────────────

    /// Fan out one inference request per model over the current input.
    ///
    /// Allowed while a previous run is still in flight; the previous run's
    /// completions will no longer match and are dropped on arrival.
    pub fn run_comparison(&mut self) -> Result<(), SessionError> {
        let (bundle, ticket) = self.workbench.begin_comparison()?;
        self.publish();

        for model in ModelIdentity::ALL {
            let attempt = ticket.attempt(model);
            let backend = Arc::clone(&self.backend);
            let bundle = Arc::clone(&bundle);
            let events = self.events_tx.clone();
            let span = info_span!("inference", session_id = %self.session_id, %model, attempt = attempt.0);
            tokio::spawn(
                async move {
                    let result = backend.infer(model, bundle).await;
                    debug!(ok = result.is_ok(), "Inference request finished");
                    let _ = events.send(SessionEvent::InferenceSettled {
                        model,
                        attempt,
                        result,
                    });
                }
                .instrument(span),
            );
        }
        Ok(())
    }

    // ── Feedback Session ─────────────────────────────────────────────────

    /// Label one model's response as pass or fail.
    pub fn submit_label(
        &mut self,
        model: ModelIdentity,
        is_pass: bool,
    ) -> Result<AttemptId, SessionError> {
        let (key, attempt, feedback) = self.workbench.begin_label(model, is_pass)?;
        self.timers.disarm(key);
        self.publish();

        let backend = Arc::clone(&self.backend);
        let events = self.events_tx.clone();
        let span = info_span!("feedback", session_id = %self.session_id, %key, attempt = attempt.0);
        tokio::spawn(
            async move {
                let result = backend.submit_sft(feedback).await;
                let _ = events.send(SessionEvent::FeedbackSettled {
                    key,
                    attempt,
                    result,
                });
            }
            .instrument(span),
        );
        Ok(attempt)
    }

    pub fn select_winner(&mut self, winner: ModelIdentity) -> Result<(), SessionError> {
        self.workbench.select_winner(winner)?;
        self.publish();
        Ok(())
    }

    pub fn clear_winner(&mut self) {
        self.workbench.clear_winner();
        self.publish();
    }

    pub fn set_rationale(&mut self, rationale: &str) {
        self.workbench.set_rationale(rationale);
        self.publish();
    }

    /// Submit the selected winner/loser pair.
    pub fn submit_preference(&mut self) -> Result<AttemptId, SessionError> {
        let (attempt, feedback) = self.workbench.begin_preference()?;
        let key = FeedbackActionKey::Preference;
        self.timers.disarm(key);
        self.publish();

        let backend = Arc::clone(&self.backend);
        let events = self.events_tx.clone();
        let span = info_span!("feedback", session_id = %self.session_id, %key, attempt = attempt.0);
        tokio::spawn(
            async move {
                let result = backend.submit_dpo(feedback).await;
                let _ = events.send(SessionEvent::FeedbackSettled {
                    key,
                    attempt,
                    result,
                });
            }
            .instrument(span),
        );
        Ok(attempt)
    }

    // ── Event loop ───────────────────────────────────────────────────────

    /// Wait for the next completion. Never returns `None` while the driver
    /// is alive, since it holds a sender itself.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events_rx.recv().await
    }

    /// Apply one completion. Returns whether any state changed.
    pub fn apply(&mut self, event: SessionEvent) -> bool {
        let changed = match event {
            SessionEvent::InferenceSettled {
                model,
                attempt,
                result,
            } => self.workbench.apply_inference(model, attempt, result),
            SessionEvent::FeedbackSettled {
                key,
                attempt,
                result,
            } => {
                let applied = self.workbench.apply_feedback(key, attempt, result);
                if applied {
                    self.timers.arm(key, attempt, self.events_tx.clone());
                }
                applied
            }
            SessionEvent::FeedbackExpired { key, attempt } => {
                self.timers.fired(key, attempt);
                self.workbench.expire_feedback(key, attempt)
            }
        };
        if changed {
            self.publish();
        }
        changed
    }

    /// Receive and apply one completion.
    pub async fn step(&mut self) -> bool {
        match self.next_event().await {
            Some(event) => self.apply(event),
            None => false,
        }
    }

    /// Apply every completion that has already arrived, without waiting.
    /// Returns how many changed state.
    pub fn drain_ready(&mut self) -> usize {
        let mut changed = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            if self.apply(event) {
                changed += 1;
            }
        }
        changed
    }

    /// Pump events until the current comparison run has fully settled.
    pub async fn settle_comparison(&mut self) {
        while self.workbench.is_busy() {
            self.step().await;
        }
    }

    /// Pump events until no feedback submission is pending.
    pub async fn settle_feedback(&mut self) {
        while self.workbench.feedback().has_pending() {
            self.step().await;
        }
    }
}
