//! Dialogue backend collaborator
//!
//! The remote service owns story generation. This module only speaks its
//! JSON protocol and classifies its failures.

mod client;
mod error;
mod types;

pub use client::HttpStoryBackend;
pub use error::{BackendError, BackendErrorKind};
pub use types::*;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

/// The three calls the session engine makes against the backend
#[async_trait]
pub trait StoryBackend: Send + Sync {
    /// Start a new story or fetch the stored history of an existing one
    async fn start_or_continue_story(
        &self,
        request: &StartStoryRequest,
    ) -> Result<StoryStart, BackendError>;

    /// Generate the next dialogue line
    async fn get_next_dialogue(
        &self,
        request: &DialogueRequest,
    ) -> Result<DialogueLineResponse, BackendError>;

    /// Generate the choices offered at a round boundary
    async fn generate_choices(&self, request: &ChoicesRequest)
        -> Result<Vec<String>, BackendError>;
}

#[async_trait]
impl<T: StoryBackend + ?Sized> StoryBackend for Arc<T> {
    async fn start_or_continue_story(
        &self,
        request: &StartStoryRequest,
    ) -> Result<StoryStart, BackendError> {
        (**self).start_or_continue_story(request).await
    }

    async fn get_next_dialogue(
        &self,
        request: &DialogueRequest,
    ) -> Result<DialogueLineResponse, BackendError> {
        (**self).get_next_dialogue(request).await
    }

    async fn generate_choices(
        &self,
        request: &ChoicesRequest,
    ) -> Result<Vec<String>, BackendError> {
        (**self).generate_choices(request).await
    }
}

/// Logging wrapper for a story backend
pub struct LoggingBackend {
    inner: Arc<dyn StoryBackend>,
}

impl LoggingBackend {
    pub fn new(inner: Arc<dyn StoryBackend>) -> Self {
        Self { inner }
    }
}

fn log_outcome<T>(
    endpoint: &'static str,
    story_id: &str,
    started: Instant,
    result: &Result<T, BackendError>,
) {
    let duration = started.elapsed();
    match result {
        Ok(_) => {
            tracing::info!(
                endpoint,
                story_id = %story_id,
                duration_ms = %duration.as_millis(),
                "Backend request completed"
            );
        }
        Err(e) => {
            tracing::error!(
                endpoint,
                story_id = %story_id,
                duration_ms = %duration.as_millis(),
                status = ?e.status,
                error = %e.message,
                "Backend request failed"
            );
        }
    }
}

#[async_trait]
impl StoryBackend for LoggingBackend {
    async fn start_or_continue_story(
        &self,
        request: &StartStoryRequest,
    ) -> Result<StoryStart, BackendError> {
        let started = Instant::now();
        let result = self.inner.start_or_continue_story(request).await;
        log_outcome("start_or_continue_story", &request.story_id, started, &result);
        result
    }

    async fn get_next_dialogue(
        &self,
        request: &DialogueRequest,
    ) -> Result<DialogueLineResponse, BackendError> {
        let started = Instant::now();
        let result = self.inner.get_next_dialogue(request).await;
        log_outcome("get_next_dialogue", &request.story_id, started, &result);
        result
    }

    async fn generate_choices(
        &self,
        request: &ChoicesRequest,
    ) -> Result<Vec<String>, BackendError> {
        let started = Instant::now();
        let result = self.inner.generate_choices(request).await;
        log_outcome("generate_choices", &request.story_id, started, &result);
        result
    }
}
