//! Effects produced by state transitions

use std::time::Duration;

/// Effects to be executed after state transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Load the preset and call start-or-continue.
    /// The prompt and scripted opening are only sent for new stories.
    StartStory { send_preset: bool },

    /// Ask for the next dialogue line
    RequestDialogue { user_message: String, attempt: u32 },

    /// Ask for the choices that end a round
    RequestChoices,

    /// Schedule a dialogue retry
    ScheduleRetry { delay: Duration, attempt: u32 },

    /// Schedule the next automatic dialogue request
    ScheduleAdvance { delay: Duration },

    /// Run the typewriter reveal for a new message
    RevealMessage { message_id: String, display: String },

    /// Remember that the user has started this story
    MarkStarted,
}

impl Effect {
    pub fn request_dialogue(user_message: impl Into<String>, attempt: u32) -> Self {
        Effect::RequestDialogue {
            user_message: user_message.into(),
            attempt,
        }
    }
}
