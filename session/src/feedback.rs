//! Feedback Session: keyed, self-expiring submission statuses.
//!
//! Each [`FeedbackActionKey`] moves through its own lifecycle:
//!
//! ```text
//! absent ──begin()──► Pending ──settle()──► Success | Error ──expire()──► absent
//!                        ▲                         │
//!                        └─────────begin()─────────┘   (resubmission)
//! ```
//!
//! Attempt counters are kept for the lifetime of the session, even after a
//! status expires, so a settlement or expiry belonging to an older attempt
//! never matches the current one. [`ExpiryTimers`] holds the per-key timer
//! tasks; arming a key aborts whatever timer that key had before.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::driver::SessionEvent;
use crate::error::RequestError;
use crate::types::{AttemptId, FeedbackActionKey, FeedbackStatus};

/// How long a settled status stays visible.
pub const DEFAULT_FEEDBACK_EXPIRY: Duration = Duration::from_secs(3);

/// Status map for the five feedback actions.
#[derive(Debug, Clone, Default)]
pub struct FeedbackSession {
    statuses: BTreeMap<FeedbackActionKey, FeedbackStatus>,
    attempts: HashMap<FeedbackActionKey, AttemptId>,
}

impl FeedbackSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new attempt under `key`; its status becomes `Pending`
    /// immediately, replacing whatever the previous attempt showed.
    pub fn begin(&mut self, key: FeedbackActionKey) -> AttemptId {
        let attempt = self.current_attempt(key).next();
        self.attempts.insert(key, attempt);
        self.statuses.insert(key, FeedbackStatus::Pending);
        info!(%key, attempt = attempt.0, "Feedback submission started");
        attempt
    }

    /// Record the outcome of `attempt`. Returns false (and changes nothing)
    /// when a newer attempt under the same key exists.
    pub fn settle(
        &mut self,
        key: FeedbackActionKey,
        attempt: AttemptId,
        result: Result<(), RequestError>,
    ) -> bool {
        if self.current_attempt(key) != attempt
            || !matches!(self.statuses.get(&key), Some(FeedbackStatus::Pending))
        {
            debug!(%key, attempt = attempt.0, "Discarding superseded feedback settlement");
            return false;
        }
        let status = match result {
            Ok(()) => {
                info!(%key, attempt = attempt.0, "Feedback saved");
                FeedbackStatus::Success
            }
            Err(err) => {
                warn!(%key, attempt = attempt.0, kind = err.kind(), "Feedback failed: {err}");
                FeedbackStatus::Error {
                    message: err.to_string(),
                }
            }
        };
        self.statuses.insert(key, status);
        true
    }

    /// Remove the settled status of `attempt`. A no-op when a newer attempt
    /// has taken over the key or the status is still pending.
    pub fn expire(&mut self, key: FeedbackActionKey, attempt: AttemptId) -> bool {
        if self.current_attempt(key) != attempt {
            return false;
        }
        match self.statuses.get(&key) {
            Some(status) if status.is_settled() => {
                self.statuses.remove(&key);
                debug!(%key, attempt = attempt.0, "Feedback status expired");
                true
            }
            _ => false,
        }
    }

    pub fn status(&self, key: FeedbackActionKey) -> Option<&FeedbackStatus> {
        self.statuses.get(&key)
    }

    /// All present statuses; keys not in the map are absent.
    pub fn statuses(&self) -> &BTreeMap<FeedbackActionKey, FeedbackStatus> {
        &self.statuses
    }

    pub fn current_attempt(&self, key: FeedbackActionKey) -> AttemptId {
        self.attempts.get(&key).copied().unwrap_or_default()
    }

    /// Whether any submission is still waiting on the network.
    pub fn has_pending(&self) -> bool {
        self.statuses.values().any(|s| !s.is_settled())
    }
}

/// One scheduled expiry task per feedback key.
#[derive(Debug)]
pub struct ExpiryTimers {
    delay: Duration,
    handles: HashMap<FeedbackActionKey, (AttemptId, JoinHandle<()>)>,
}

impl ExpiryTimers {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            handles: HashMap::new(),
        }
    }

    /// Schedule removal of `attempt`'s status after the fixed delay. Any
    /// timer previously armed for `key` is aborted first.
    pub fn arm(
        &mut self,
        key: FeedbackActionKey,
        attempt: AttemptId,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) {
        self.disarm(key);
        let delay = self.delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(SessionEvent::FeedbackExpired { key, attempt });
        });
        self.handles.insert(key, (attempt, handle));
    }

    /// Abort the timer armed for `key`, if any.
    pub fn disarm(&mut self, key: FeedbackActionKey) {
        if let Some((attempt, handle)) = self.handles.remove(&key) {
            if !handle.is_finished() {
                debug!(%key, attempt = attempt.0, "Disarming superseded expiry timer");
            }
            handle.abort();
        }
    }

    /// Drop bookkeeping for a timer that has fired.
    pub fn fired(&mut self, key: FeedbackActionKey, attempt: AttemptId) {
        if matches!(self.handles.get(&key), Some((armed, _)) if *armed == attempt) {
            self.handles.remove(&key);
        }
    }

    /// Number of timers currently armed.
    pub fn armed(&self) -> usize {
        self.handles.len()
    }
}

impl Drop for ExpiryTimers {
    fn drop(&mut self) {
        for (_, (_, handle)) in self.handles.drain() {
            handle.abort();
        }
    }
}
