//! HTTP implementation of the session [`Backend`].
//!
//! Every request is multipart (image + text fields) except the two probes:
//!
//! | Call          | Method | Endpoint            | Fields                                             |
//! |---------------|--------|---------------------|----------------------------------------------------|
//! | `infer`       | POST   | `{teacher,student}` | file, query                                        |
//! | `submit_sft`  | POST   | `feedback/sft`      | file, query, response, model_name, is_pass         |
//! | `submit_dpo`  | POST   | `feedback/dpo`      | file, query, model_winner/loser, response_*, [comment] |
//! | `ask`         | POST   | `inference`         | file, prompt                                       |
//! | `health`      | GET    | `health`            |                                                    |
//! | `stats`       | GET    | `stats`             |                                                    |

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};
use vlm_session::{
    Backend, DpoFeedback, HealthStatus, InferenceOutput, InputBundle, ModelIdentity, RequestError,
    SftFeedback,
};

use crate::config::WorkbenchConfig;

/// Reply of the single-model `inference` endpoint.
#[derive(Debug, Deserialize)]
struct AskResponse {
    response: String,
}

pub struct HttpBackend {
    client: Client,
    config: Arc<WorkbenchConfig>,
}

impl HttpBackend {
    pub fn new(config: Arc<WorkbenchConfig>) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, config })
    }

    /// Single-model question about the image, outside the comparison flow.
    pub async fn ask(&self, bundle: &InputBundle) -> Result<String, RequestError> {
        let form = Form::new()
            .part("file", image_part(bundle)?)
            .text("prompt", bundle.prompt.clone());
        let response = self.post_form("inference", form).await?;
        let reply: AskResponse = read_json(response).await?;
        Ok(reply.response)
    }

    /// Engine statistics, passed through untyped.
    pub async fn stats(&self) -> Result<serde_json::Value, RequestError> {
        let response = self.get("stats").await?;
        read_json(response).await
    }

    async fn post_form(&self, endpoint: &str, form: Form) -> Result<Response, RequestError> {
        let url = self.config.api_url(endpoint);
        debug!(%url, "POST");
        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(transport_error)?;
        check_status(response)
    }

    async fn get(&self, endpoint: &str) -> Result<Response, RequestError> {
        let url = self.config.api_url(endpoint);
        debug!(%url, "GET");
        let response = self.client.get(&url).send().await.map_err(transport_error)?;
        check_status(response)
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn infer(
        &self,
        model: ModelIdentity,
        bundle: Arc<InputBundle>,
    ) -> Result<InferenceOutput, RequestError> {
        let response = self.post_form(model.as_str(), bundle_form(&bundle)?).await?;
        let body = response.text().await.map_err(transport_error)?;
        parse_inference(&body)
    }

    async fn submit_sft(&self, feedback: SftFeedback) -> Result<(), RequestError> {
        let form = bundle_form(&feedback.bundle)?
            .text("response", feedback.response)
            .text("model_name", feedback.model.as_str())
            .text("is_pass", feedback.is_pass.to_string());
        self.post_form("feedback/sft", form).await?;
        Ok(())
    }

    async fn submit_dpo(&self, feedback: DpoFeedback) -> Result<(), RequestError> {
        let mut form = bundle_form(&feedback.bundle)?
            .text("model_winner", feedback.winner.as_str())
            .text("model_loser", feedback.loser.as_str())
            .text("response_winner", feedback.response_winner)
            .text("response_loser", feedback.response_loser);
        if let Some(comment) = feedback.comment {
            form = form.text("comment", comment);
        }
        self.post_form("feedback/dpo", form).await?;
        Ok(())
    }

    async fn health(&self) -> Result<HealthStatus, RequestError> {
        let response = self.get("health").await?;
        read_json(response).await
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn bundle_form(bundle: &InputBundle) -> Result<Form, RequestError> {
    Ok(Form::new()
        .part("file", image_part(bundle)?)
        .text("query", bundle.prompt.clone()))
}

fn image_part(bundle: &InputBundle) -> Result<Part, RequestError> {
    let mut part = Part::bytes(bundle.image.clone()).file_name(bundle.file_name.clone());
    if let Some(mime) = mime_for_name(&bundle.file_name) {
        part = part
            .mime_str(mime)
            .map_err(|e| RequestError::Transport(format!("invalid mime '{mime}': {e}")))?;
    }
    Ok(part)
}

/// Content type from the file extension; unknown extensions are sent
/// without one.
pub fn mime_for_name(file_name: &str) -> Option<&'static str> {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "bmp" => Some("image/bmp"),
        _ => None,
    }
}

fn check_status(response: Response) -> Result<Response, RequestError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        warn!(code = status.as_u16(), url = %response.url(), "Backend returned error status");
        Err(status_error(status))
    }
}

pub fn status_error(status: StatusCode) -> RequestError {
    RequestError::status(status.as_u16(), status.canonical_reason())
}

fn transport_error(err: reqwest::Error) -> RequestError {
    if err.is_timeout() {
        RequestError::Transport("request timed out".into())
    } else {
        RequestError::Transport(err.to_string())
    }
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, RequestError> {
    let body = response.text().await.map_err(transport_error)?;
    serde_json::from_str(&body).map_err(|e| RequestError::MalformedBody(e.to_string()))
}

/// Decode an inference reply. Both `response` and `latency` are required.
pub fn parse_inference(body: &str) -> Result<InferenceOutput, RequestError> {
    serde_json::from_str(body).map_err(|e| RequestError::MalformedBody(e.to_string()))
}
