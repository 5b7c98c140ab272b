//! Backend error types

use thiserror::Error;

/// Backend error with classification
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct BackendError {
    pub kind: BackendErrorKind,
    /// HTTP status, when the failure came from a non-success response
    pub status: Option<u16>,
    pub message: String,
}

/// Error classification for retry and display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// 503 - retried once on the first dialogue attempt
    ServiceUnavailable,
    /// Any other non-success status
    Http,
    /// Connection failures, timeouts
    Network,
    /// 200 response carrying an explicit `error` field
    Rejected,
    /// Body could not be decoded
    Malformed,
}

impl BackendError {
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::ServiceUnavailable, message).with_status(503)
    }

    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Http, message).with_status(status)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Network, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Rejected, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Malformed, message)
    }

    pub fn is_service_unavailable(&self) -> bool {
        self.kind == BackendErrorKind::ServiceUnavailable
    }

    /// Classify a success response that carries an `error` field
    pub fn from_envelope(status: Option<u16>, message: impl Into<String>) -> Self {
        match status {
            Some(503) => Self::service_unavailable(message),
            Some(code) if code >= 400 => Self::http(code, message),
            _ => Self::rejected(message),
        }
    }

    /// Classify a non-success HTTP response
    ///
    /// The backend reports failures as `{"error": "..."}`; anything else is
    /// shown as the raw body, falling back to the canonical reason phrase.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let message = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
            .or_else(|| {
                let trimmed = body.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            })
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("Unknown status")
                    .to_string()
            });

        match status.as_u16() {
            503 => Self::service_unavailable(message),
            code => Self::http(code, message),
        }
    }
}
