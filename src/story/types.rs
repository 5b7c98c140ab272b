//! Wire types for the dialogue backend

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Speaker name -> role description, as configured in a story preset
pub type CharacterRoles = BTreeMap<String, String>;

/// Who produced a turn in the durable history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    System,
    User,
    Model,
    /// Roles this client does not know about; never displayed
    #[serde(other)]
    Unknown,
}

/// A single text part of a turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    pub text: String,
}

/// One entry in the durable conversation history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub parts: Vec<Part>,
}

impl ConversationTurn {
    #[cfg(test)]
    pub fn new(role: TurnRole, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![Part { text: text.into() }],
        }
    }

    #[cfg(test)]
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(TurnRole::System, text)
    }

    #[cfg(test)]
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(TurnRole::User, text)
    }

    #[cfg(test)]
    pub fn model(text: impl Into<String>) -> Self {
        Self::new(TurnRole::Model, text)
    }

    /// Text of the first part, if any
    pub fn text(&self) -> Option<&str> {
        self.parts.first().map(|p| p.text.as_str())
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Body of `/start_or_continue_story`
///
/// The prompt and initial history are only sent for brand-new stories.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartStoryRequest {
    pub user_id: String,
    pub story_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_history: Option<Vec<ConversationTurn>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub character_roles: Option<CharacterRoles>,
}

/// Body of `/get_next_dialogue`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogueRequest {
    pub user_id: String,
    pub story_id: String,
    pub conversation_history: Vec<ConversationTurn>,
    pub user_message: String,
    pub character_roles: CharacterRoles,
}

/// Body of `/generate_choices`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChoicesRequest {
    pub user_id: String,
    pub story_id: String,
    pub conversation_history: Vec<ConversationTurn>,
}

// ============================================================================
// Responses
// ============================================================================

/// Envelope shared by every backend endpoint
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse {
    /// HTTP-style code, sent either as a number or a numeric string
    #[serde(default)]
    pub status: serde_json::Value,
    #[serde(default)]
    pub new_dialogue: Option<String>,
    #[serde(default)]
    pub full_history: Option<Vec<ConversationTurn>>,
    #[serde(default)]
    pub conversation_history: Option<Vec<ConversationTurn>>,
    #[serde(default)]
    pub character_roles: Option<CharacterRoles>,
    #[serde(default)]
    pub choices: Option<Vec<String>>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ApiResponse {
    pub fn status_code(&self) -> Option<u16> {
        match &self.status {
            serde_json::Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Result of starting or continuing a story
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StoryStart {
    /// Server-confirmed history (empty if the server sent none)
    pub history: Vec<ConversationTurn>,
    pub character_roles: Option<CharacterRoles>,
}

/// Result of asking for the next line
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DialogueLineResponse {
    pub new_dialogue: Option<String>,
    /// Corrected history; replaces the local copy when present
    pub full_history: Option<Vec<ConversationTurn>>,
}

impl From<ApiResponse> for StoryStart {
    fn from(resp: ApiResponse) -> Self {
        Self {
            history: resp.conversation_history.unwrap_or_default(),
            character_roles: resp.character_roles,
        }
    }
}

impl From<ApiResponse> for DialogueLineResponse {
    fn from(resp: ApiResponse) -> Self {
        Self {
            new_dialogue: resp.new_dialogue,
            full_history: resp.full_history,
        }
    }
}
