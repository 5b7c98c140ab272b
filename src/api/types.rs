//! API request and response types

use crate::dialogue::{self, Segment, SpeakerLabel};
use crate::preset::StoryPreset;
use crate::state_machine::{Message, SessionPhase, SessionState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Request to open a session
#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub story_id: String,
    #[serde(default)]
    pub is_new_story: bool,
}

/// Request to pick one of the offered choices
#[derive(Debug, Deserialize)]
pub struct ChoiceRequest {
    pub text: String,
}

/// Request to report a locally finished reveal
#[derive(Debug, Deserialize)]
pub struct AnimationFinishedRequest {
    pub message_id: String,
}

/// Response for session creation
#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
}

/// Response for reader actions
#[derive(Debug, Serialize)]
pub struct AcceptedResponse {
    pub accepted: bool,
}

/// Response for lifecycle actions
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Preset as shown in the story picker (no prompt, no script)
#[derive(Debug, Serialize)]
pub struct StorySummary {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_image_url: Option<String>,
    pub genres: Vec<String>,
}

impl From<&StoryPreset> for StorySummary {
    fn from(preset: &StoryPreset) -> Self {
        Self {
            id: preset.id.clone(),
            title: preset.title.clone(),
            description: preset.description.clone(),
            cover_image_url: preset.cover_image_url.clone(),
            genres: preset.genres.clone(),
        }
    }
}

/// Response with presets grouped by genre
#[derive(Debug, Serialize)]
pub struct StoryListResponse {
    pub genres: BTreeMap<String, Vec<StorySummary>>,
}

/// Chat bubble with its display formatting resolved
#[derive(Debug, Serialize)]
pub struct MessageView {
    pub id: String,
    pub author: String,
    pub text: String,
    pub display_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker: Option<SpeakerLabel>,
    pub segments: Vec<Segment>,
    pub timestamp: i64,
    pub is_animated: bool,
}

impl From<&Message> for MessageView {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id.clone(),
            author: message.author.clone(),
            text: message.text.clone(),
            display_text: message.display_text(),
            speaker: dialogue::speaker_label(&message.author),
            segments: dialogue::styled_segments(&message.author, &message.text),
            timestamp: message.timestamp,
            is_animated: message.is_animated,
        }
    }
}

/// What the chat screen observes
#[derive(Debug, Serialize)]
pub struct SessionView {
    pub messages: Vec<MessageView>,
    pub choices: Vec<String>,
    pub character_roles: BTreeMap<String, String>,
    pub is_loading: bool,
    pub is_paused: bool,
    pub is_generating: bool,
    pub is_new_story: bool,
    pub round_count: u32,
    pub phase: SessionPhase,
}

impl From<&SessionState> for SessionView {
    fn from(state: &SessionState) -> Self {
        Self {
            messages: state.messages.iter().map(MessageView::from).collect(),
            choices: state.choices.clone(),
            character_roles: state.character_roles.clone(),
            is_loading: state.is_loading,
            is_paused: state.is_paused,
            is_generating: state.is_generating,
            is_new_story: state.is_new_story,
            round_count: state.round_count,
            phase: state.phase.clone(),
        }
    }
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
