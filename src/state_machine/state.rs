//! Session state types

use crate::dialogue::{self, DialogueLine};
use crate::story::{CharacterRoles, ConversationTurn, TurnRole};
use serde::Serialize;
use std::time::Duration;

/// Dialogue rounds between two choice prompts
pub const MAX_ROUNDS: u32 = 10;

/// Prefix the backend puts on stored user turns
const USER_TURN_PREFIX: &str = "USER:";

// ============================================================================
// Messages
// ============================================================================

/// One bubble in the chat log
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub id: String,
    pub author: String,
    pub text: String,
    /// Epoch millis
    pub timestamp: i64,
    /// Set once the reveal sequence has completed
    pub is_animated: bool,
}

impl Message {
    /// A freshly generated line, not yet revealed
    pub fn dialogue(id: impl Into<String>, line: DialogueLine, timestamp: i64) -> Self {
        Self {
            id: id.into(),
            author: line.author,
            text: line.text,
            timestamp,
            is_animated: false,
        }
    }

    pub fn user(id: impl Into<String>, text: impl Into<String>, timestamp: i64) -> Self {
        Self {
            id: id.into(),
            author: dialogue::YOU.to_string(),
            text: text.into(),
            timestamp,
            is_animated: true,
        }
    }

    pub fn system(id: impl Into<String>, text: impl Into<String>, timestamp: i64) -> Self {
        Self {
            id: id.into(),
            author: dialogue::SYSTEM.to_string(),
            text: text.into(),
            timestamp,
            is_animated: true,
        }
    }

    /// Text as displayed (narration parenthesized)
    pub fn display_text(&self) -> String {
        dialogue::display_text(&self.author, &self.text)
    }
}

/// Project durable history into display messages.
///
/// Skips the first `skip` turns (system prompt and scripted opening of a new
/// story), drops system and blank user turns, strips the stored `USER:` prefix
/// and splits model lines into speaker and text. Projected messages are
/// already revealed and get ids derived from their history index.
pub fn project_history(history: &[ConversationTurn], skip: usize, timestamp: i64) -> Vec<Message> {
    history
        .iter()
        .enumerate()
        .skip(skip)
        .filter_map(|(index, turn)| {
            let raw = turn.text()?.trim();
            let id = format!("turn-{index}");
            match turn.role {
                TurnRole::User => {
                    let text = raw.strip_prefix(USER_TURN_PREFIX).unwrap_or(raw).trim();
                    if text.is_empty() {
                        None
                    } else {
                        Some(Message::user(id, dialogue::strip_quotes(text), timestamp))
                    }
                }
                TurnRole::Model => {
                    let mut message = Message::dialogue(id, dialogue::parse_line(raw), timestamp);
                    message.is_animated = true;
                    Some(message)
                }
                TurnRole::System | TurnRole::Unknown => None,
            }
        })
        .collect()
}

// ============================================================================
// Session Phase
// ============================================================================

/// Where the session is in its request/reveal cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionPhase {
    /// Nothing requested yet
    #[default]
    Idle,

    /// Start-or-continue request in flight
    Starting,

    /// Dialogue request in flight
    AwaitingDialogue {
        attempt: u32,
        user_message: String,
        show_loading: bool,
    },

    /// Backing off before retrying a dialogue request
    RetryPending {
        attempt: u32,
        user_message: String,
        show_loading: bool,
    },

    /// A new line is being revealed
    RevealingMessage { message_id: String },

    /// Short pause before the next line is requested
    Advancing,

    /// Choices request in flight
    AwaitingChoices,

    /// Choices are on screen, waiting for the reader
    ChoicesReady,

    /// Auto-advance stopped by the reader
    Paused,

    /// Paused while a dialogue request was due; resuming sends it
    PausedBeforeDialogue {
        attempt: u32,
        user_message: String,
        show_loading: bool,
    },

    /// Auto-advance stopped by an error
    Halted,
}

impl SessionPhase {
    /// A backend request (or its retry) is outstanding
    pub fn is_request_in_flight(&self) -> bool {
        matches!(
            self,
            SessionPhase::Starting
                | SessionPhase::AwaitingDialogue { .. }
                | SessionPhase::RetryPending { .. }
                | SessionPhase::AwaitingChoices
        )
    }

    /// Nothing pending that would continue the round by itself
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            SessionPhase::Idle
                | SessionPhase::Paused
                | SessionPhase::PausedBeforeDialogue { .. }
                | SessionPhase::Halted
                | SessionPhase::ChoicesReady
        )
    }
}

// ============================================================================
// Session State
// ============================================================================

/// Everything the UI observes about one story session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct SessionState {
    /// Authoritative story state, as last confirmed by the server
    pub history: Vec<ConversationTurn>,
    /// Display log
    pub messages: Vec<Message>,
    pub choices: Vec<String>,
    pub character_roles: CharacterRoles,
    pub is_loading: bool,
    pub is_paused: bool,
    pub is_generating: bool,
    pub is_new_story: bool,
    pub round_count: u32,
    pub phase: SessionPhase,
}

impl SessionState {
    pub fn new(is_new_story: bool) -> Self {
        Self {
            is_new_story,
            ..Self::default()
        }
    }

    #[cfg(test)]
    pub fn message(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }
}

// ============================================================================
// Context
// ============================================================================

/// Delays used by the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTiming {
    /// Gap between a finished reveal and the next request
    pub inter_message_delay: Duration,
    /// Backoff before retrying a 503
    pub retry_delay: Duration,
    /// Time per revealed character
    pub reveal_char_delay: Duration,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            inter_message_delay: Duration::from_millis(50),
            retry_delay: Duration::from_millis(2000),
            reveal_char_delay: Duration::from_millis(50),
        }
    }
}

/// Context for a session (immutable configuration)
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: String,
    pub story_id: String,
    /// `None` when nobody is signed in
    pub user_id: Option<String>,
    pub max_rounds: u32,
    pub timing: SessionTiming,
}

impl SessionContext {
    pub fn new(
        session_id: impl Into<String>,
        story_id: impl Into<String>,
        user_id: Option<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            story_id: story_id.into(),
            user_id,
            max_rounds: MAX_ROUNDS,
            timing: SessionTiming::default(),
        }
    }

    pub fn with_timing(mut self, timing: SessionTiming) -> Self {
        self.timing = timing;
        self
    }
}
