//! Events that can occur in a story session

use crate::error::SessionError;
use crate::story::{CharacterRoles, ConversationTurn};

/// Id and time for a message an event may append.
///
/// Generated outside the transition so transitions stay pure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stamp {
    pub id: String,
    /// Epoch millis
    pub at: i64,
}

impl Stamp {
    pub fn now() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            at: chrono::Utc::now().timestamp_millis(),
        }
    }

    #[cfg(test)]
    pub fn fixed(id: &str, at: i64) -> Self {
        Self {
            id: id.to_string(),
            at,
        }
    }
}

/// Events that trigger state transitions
#[derive(Debug, Clone)]
pub enum Event {
    // Reader actions
    BeginStory {
        stamp: Stamp,
    },
    ChoiceSelected {
        text: String,
        stamp: Stamp,
    },
    TogglePause,
    AnimationFinished {
        message_id: String,
    },

    // Backend outcomes
    StoryStarted {
        history: Vec<ConversationTurn>,
        /// Length of the preset's scripted opening
        initial_history_len: usize,
        character_roles: CharacterRoles,
        stamp: Stamp,
    },
    StartFailed {
        error: SessionError,
        stamp: Stamp,
    },
    DialogueReceived {
        new_dialogue: Option<String>,
        full_history: Option<Vec<ConversationTurn>>,
        stamp: Stamp,
    },
    DialogueFailed {
        error: SessionError,
        attempt: u32,
        stamp: Stamp,
    },
    ChoicesReceived {
        choices: Vec<String>,
    },
    ChoicesFailed {
        error: SessionError,
        stamp: Stamp,
    },

    // Timers
    RetryTimeout {
        attempt: u32,
    },
    AdvanceTimeout,
}

impl Event {
    pub fn begin_story() -> Self {
        Event::BeginStory {
            stamp: Stamp::now(),
        }
    }

    pub fn choice_selected(text: impl Into<String>) -> Self {
        Event::ChoiceSelected {
            text: text.into(),
            stamp: Stamp::now(),
        }
    }
}
