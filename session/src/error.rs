//! Error taxonomy for the session layer.
//!
//! Two families:
//!
//! | Type           | Raised by                          | Effect                           |
//! |----------------|------------------------------------|----------------------------------|
//! | `RequestError` | a [`Backend`](crate::Backend) call | folded into run / feedback state |
//! | `SessionError` | a rejected user operation          | no state change                  |
//!
//! Transport failures, non-success statuses and malformed bodies are kept as
//! separate variants only for logging; downstream every `RequestError` is
//! reduced to its display message.

use thiserror::Error;

use crate::types::ModelIdentity;

/// A failed call to the inference/feedback collaborator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RequestError {
    /// Connection refused, timeout, broken body stream.
    #[error("{0}")]
    Transport(String),

    /// Non-2xx response. Displays as the status reason text.
    #[error("{reason}")]
    Status { code: u16, reason: String },

    /// 2xx response whose body is not the expected JSON.
    #[error("malformed response: {0}")]
    MalformedBody(String),
}

impl RequestError {
    /// Build a status error, falling back to `HTTP <code>` when the status
    /// has no canonical reason.
    pub fn status(code: u16, reason: Option<&str>) -> Self {
        let reason = match reason {
            Some(r) if !r.trim().is_empty() => r.to_string(),
            _ => format!("HTTP {code}"),
        };
        Self::Status { code, reason }
    }

    /// Stable category name for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Status { .. } => "status",
            Self::MalformedBody(_) => "malformed_body",
        }
    }
}

/// An operation the current state does not permit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("no image loaded")]
    MissingImage,

    #[error("prompt is empty")]
    EmptyPrompt,

    #[error("a comparison is already running")]
    Busy,

    #[error("{0} has no successful response to label")]
    RunNotSucceeded(ModelIdentity),

    #[error("select a preferred model first")]
    NoWinnerSelected,

    #[error("both models must succeed before a preference can be recorded")]
    PreferenceUnavailable,

    #[error("preference already saved for this comparison")]
    AlreadySaved,

    #[error("unknown model '{0}' (expected teacher or student)")]
    UnknownModel(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_uses_reason_text() {
        let err = RequestError::status(500, Some("Internal Server Error"));
        assert_eq!(err.to_string(), "Internal Server Error");
        assert_eq!(err.kind(), "status");
    }

    #[test]
    fn test_status_error_falls_back_to_code() {
        assert_eq!(RequestError::status(599, None).to_string(), "HTTP 599");
        assert_eq!(RequestError::status(599, Some("  ")).to_string(), "HTTP 599");
    }

    #[test]
    fn test_session_error_messages() {
        assert_eq!(
            SessionError::RunNotSucceeded(ModelIdentity::Student).to_string(),
            "student has no successful response to label"
        );
    }
}
