//! The external collaborator seam.
//!
//! Every network interaction of the session layer goes through [`Backend`].
//! The HTTP implementation lives in the `vlm-workbench` crate; tests use
//! scripted or mocked implementations.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::RequestError;
use crate::types::{HealthStatus, InferenceOutput, InputBundle, ModelIdentity};

/// Shared handle to a backend, cloned into every spawned request task.
pub type SharedBackend = Arc<dyn Backend>;

/// A pass/fail label for one model's response (SFT store).
#[derive(Debug, Clone, PartialEq)]
pub struct SftFeedback {
    pub bundle: Arc<InputBundle>,
    pub model: ModelIdentity,
    pub response: String,
    pub is_pass: bool,
}

/// A pairwise preference between the two responses (DPO store).
#[derive(Debug, Clone, PartialEq)]
pub struct DpoFeedback {
    pub bundle: Arc<InputBundle>,
    pub winner: ModelIdentity,
    pub loser: ModelIdentity,
    pub response_winner: String,
    pub response_loser: String,
    pub comment: Option<String>,
}

/// Inference and feedback endpoints consumed by the session.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Backend: Send + Sync {
    /// `POST /api/{teacher|student}` with the image and prompt.
    async fn infer(
        &self,
        model: ModelIdentity,
        bundle: Arc<InputBundle>,
    ) -> Result<InferenceOutput, RequestError>;

    /// `POST /api/feedback/sft`.
    async fn submit_sft(&self, feedback: SftFeedback) -> Result<(), RequestError>;

    /// `POST /api/feedback/dpo`.
    async fn submit_dpo(&self, feedback: DpoFeedback) -> Result<(), RequestError>;

    /// `GET /api/health`.
    async fn health(&self) -> Result<HealthStatus, RequestError>;
}
