//! Session error taxonomy
//!
//! Every failure a session can hit ends up here and is shown to the reader
//! as a System message. Nothing in this module is ever raised to the UI.

use crate::story::{BackendError, BackendErrorKind};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Please log in to begin a story.")]
    AuthenticationRequired,
    #[error("Story preset not found for ID: {0}")]
    PresetNotFound(String),
    #[error("Story presets are unavailable: {0}")]
    PresetUnavailable(String),
    #[error("Server did not return newDialogue.")]
    MissingDialogue,
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("Session not found: {0}")]
    SessionNotFound(String),
    #[error("Session is closed")]
    SessionClosed,
}

/// Coarse classification of a [`SessionError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    AuthenticationRequired,
    PresetNotFound,
    ServiceUnavailable,
    RequestFailed,
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::AuthenticationRequired => ErrorKind::AuthenticationRequired,
            SessionError::PresetNotFound(_) => ErrorKind::PresetNotFound,
            SessionError::Backend(e) if e.is_service_unavailable() => {
                ErrorKind::ServiceUnavailable
            }
            _ => ErrorKind::RequestFailed,
        }
    }

    /// Text of the System message appended to the chat log
    pub fn chat_text(&self) -> String {
        match self {
            SessionError::Backend(BackendError {
                status: Some(code),
                message,
                ..
            }) => format!("Error {code}: {message}. The story couldn't continue."),
            SessionError::Backend(BackendError {
                kind: BackendErrorKind::Rejected,
                message,
                ..
            }) => format!("Error: {message}. The story couldn't continue."),
            SessionError::AuthenticationRequired => {
                format!("Authentication required. {self}")
            }
            other => format!(
                "An unexpected error occurred: {}. Please check your connection.",
                other.to_string().trim_end_matches('.')
            ),
        }
    }
}
