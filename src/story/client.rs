//! reqwest implementation of the dialogue backend

use super::{
    ApiResponse, BackendError, ChoicesRequest, DialogueLineResponse, DialogueRequest,
    StartStoryRequest, StoryBackend, StoryStart,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

/// HTTP client for the dialogue backend
pub struct HttpStoryBackend {
    client: Client,
    base_url: String,
}

impl HttpStoryBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post<T: Serialize + Sync>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<ApiResponse, BackendError> {
        let url = format!("{}{path}", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BackendError::network(format!("Request timeout: {e}"))
                } else if e.is_connect() {
                    BackendError::network(format!("Connection failed: {e}"))
                } else {
                    BackendError::network(format!("Request failed: {e}"))
                }
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| BackendError::network(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(BackendError::from_status(status, &text));
        }

        let parsed: ApiResponse = serde_json::from_str(&text)
            .map_err(|e| BackendError::malformed(format!("Failed to parse response: {e}")))?;

        if let Some(error) = parsed.error.as_deref() {
            return Err(BackendError::from_envelope(parsed.status_code(), error));
        }

        Ok(parsed)
    }
}

#[async_trait]
impl StoryBackend for HttpStoryBackend {
    async fn start_or_continue_story(
        &self,
        request: &StartStoryRequest,
    ) -> Result<StoryStart, BackendError> {
        self.post("/start_or_continue_story", request)
            .await
            .map(StoryStart::from)
    }

    async fn get_next_dialogue(
        &self,
        request: &DialogueRequest,
    ) -> Result<DialogueLineResponse, BackendError> {
        self.post("/get_next_dialogue", request)
            .await
            .map(DialogueLineResponse::from)
    }

    async fn generate_choices(
        &self,
        request: &ChoicesRequest,
    ) -> Result<Vec<String>, BackendError> {
        self.post("/generate_choices", request)
            .await
            .map(|resp| resp.choices.unwrap_or_default())
    }
}
