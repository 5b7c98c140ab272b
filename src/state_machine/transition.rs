//! Pure state transition function
//!
//! Given the same state, context and event this always produces the same
//! new state and effects. All I/O happens in the runtime.

use super::state::project_history;
use super::{Effect, Event, Message, SessionContext, SessionPhase, SessionState, Stamp};
use crate::dialogue;
use crate::error::{ErrorKind, SessionError};
use crate::story::{CharacterRoles, ConversationTurn, TurnRole};
use thiserror::Error;

/// Dialogue requests start here; only this attempt is retried
const FIRST_ATTEMPT: u32 = 1;

/// Prefix stripped from a stored user turn before it is replayed
const REPLAY_PREFIX: &str = "USER: ";

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: SessionState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: SessionState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    /// No change, no effects
    pub fn unchanged(state: &SessionState) -> Self {
        Self::new(state.clone())
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

/// Errors that can occur during transition
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("The story is busy, wait for the current request to finish")]
    Busy,
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

fn invalid(event: &str, state: &SessionState) -> TransitionError {
    TransitionError::InvalidTransition(format!("{event} while {:?}", state.phase))
}

/// Pure transition function
pub fn transition(
    state: &SessionState,
    context: &SessionContext,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match event {
        // ============================================================
        // Starting
        // ============================================================
        Event::BeginStory { stamp } => begin_story(state, context, &stamp),

        Event::StoryStarted {
            history,
            initial_history_len,
            character_roles,
            stamp,
        } => {
            if state.phase != SessionPhase::Starting {
                return Err(invalid("StoryStarted", state));
            }
            Ok(story_started(
                state,
                history,
                initial_history_len,
                character_roles,
                stamp.at,
            ))
        }

        Event::StartFailed { error, stamp } => {
            if state.phase != SessionPhase::Starting {
                return Err(invalid("StartFailed", state));
            }
            Ok(halt_with_error(state.clone(), &error, &stamp))
        }

        // ============================================================
        // Dialogue
        // ============================================================
        Event::DialogueReceived {
            new_dialogue,
            full_history,
            stamp,
        } => {
            if !matches!(state.phase, SessionPhase::AwaitingDialogue { .. }) {
                return Err(invalid("DialogueReceived", state));
            }
            Ok(dialogue_received(state, new_dialogue, full_history, &stamp))
        }

        Event::DialogueFailed {
            error,
            attempt,
            stamp,
        } => match &state.phase {
            SessionPhase::AwaitingDialogue {
                attempt: current,
                user_message,
                show_loading,
            } if *current == attempt => {
                if attempt == FIRST_ATTEMPT && error.kind() == ErrorKind::ServiceUnavailable {
                    let retry_attempt = attempt + 1;
                    let mut next = state.clone();
                    next.phase = SessionPhase::RetryPending {
                        attempt: retry_attempt,
                        user_message: user_message.clone(),
                        show_loading: *show_loading,
                    };
                    Ok(TransitionResult::new(next).with_effect(Effect::ScheduleRetry {
                        delay: context.timing.retry_delay,
                        attempt: retry_attempt,
                    }))
                } else {
                    Ok(halt_with_error(state.clone(), &error, &stamp))
                }
            }
            _ => Err(invalid("DialogueFailed", state)),
        },

        Event::RetryTimeout { attempt } => match &state.phase {
            SessionPhase::RetryPending {
                attempt: pending,
                user_message,
                show_loading,
            } if *pending == attempt => Ok(request_dialogue(
                state.clone(),
                user_message.clone(),
                *show_loading,
                attempt,
            )),
            // Stale timer
            _ => Ok(TransitionResult::unchanged(state)),
        },

        // ============================================================
        // Reveal / auto-advance
        // ============================================================
        Event::AnimationFinished { message_id } => {
            Ok(animation_finished(state, context, &message_id))
        }

        Event::AdvanceTimeout => {
            if state.phase != SessionPhase::Advancing {
                // Stale timer
                return Ok(TransitionResult::unchanged(state));
            }
            let mut next = state.clone();
            if next.is_paused {
                next.phase = SessionPhase::Paused;
                Ok(TransitionResult::new(next))
            } else if !next.is_generating {
                next.phase = SessionPhase::Idle;
                Ok(TransitionResult::new(next))
            } else {
                Ok(fetch_dialogue(next, String::new(), false))
            }
        }

        // ============================================================
        // Choices
        // ============================================================
        Event::ChoiceSelected { text, stamp } => choice_selected(state, text, &stamp),

        Event::ChoicesReceived { choices } => {
            if state.phase != SessionPhase::AwaitingChoices {
                return Err(invalid("ChoicesReceived", state));
            }
            let mut next = state.clone();
            next.choices = choices;
            next.is_loading = false;
            next.phase = SessionPhase::ChoicesReady;
            Ok(TransitionResult::new(next))
        }

        Event::ChoicesFailed { error, stamp } => {
            if state.phase != SessionPhase::AwaitingChoices {
                return Err(invalid("ChoicesFailed", state));
            }
            let mut next = state.clone();
            next.choices.clear();
            Ok(halt_with_error(next, &error, &stamp))
        }

        // ============================================================
        // Pause
        // ============================================================
        Event::TogglePause => Ok(toggle_pause(state, context)),
    }
}

fn begin_story(
    state: &SessionState,
    context: &SessionContext,
    stamp: &Stamp,
) -> Result<TransitionResult, TransitionError> {
    if state.phase.is_request_in_flight() {
        return Err(TransitionError::Busy);
    }
    if !state.messages.is_empty() && !state.is_new_story {
        return Ok(TransitionResult::unchanged(state));
    }
    if context.user_id.is_none() {
        return Ok(halt_with_error(
            state.clone(),
            &SessionError::AuthenticationRequired,
            stamp,
        ));
    }

    let mut next = state.clone();
    next.choices.clear();
    next.is_loading = true;
    next.phase = SessionPhase::Starting;
    Ok(TransitionResult::new(next).with_effect(Effect::StartStory {
        send_preset: state.is_new_story,
    }))
}

fn story_started(
    state: &SessionState,
    history: Vec<ConversationTurn>,
    initial_history_len: usize,
    character_roles: CharacterRoles,
    at: i64,
) -> TransitionResult {
    // System prompt plus the scripted opening are not shown for new stories
    let skip = if state.is_new_story && initial_history_len > 0 {
        1 + initial_history_len
    } else {
        0
    };

    let mut next = state.clone();
    next.messages = project_history(&history, skip, at);
    next.history = history;
    if !character_roles.is_empty() {
        next.character_roles = character_roles;
    }
    next.is_loading = false;
    next.is_generating = !next.is_paused;

    if next.is_new_story {
        next.round_count = 0;
        return request_choices(next).with_effect(Effect::MarkStarted);
    }

    next.round_count = u32::try_from(next.messages.len()).unwrap_or(u32::MAX);
    let last_turn = next.history.last().cloned();
    let result = match last_turn {
        Some(turn) if turn.role == TurnRole::User => {
            // Interrupted before the reply to the reader's choice arrived
            let text = turn.text().unwrap_or_default();
            let user_message = text.strip_prefix(REPLAY_PREFIX).unwrap_or(text).to_string();
            fetch_dialogue(next, user_message, true)
        }
        _ => request_choices(next),
    };
    result.with_effect(Effect::MarkStarted)
}

fn dialogue_received(
    state: &SessionState,
    new_dialogue: Option<String>,
    full_history: Option<Vec<ConversationTurn>>,
    stamp: &Stamp,
) -> TransitionResult {
    let mut next = state.clone();
    // The server is the only source of truth for history
    if let Some(history) = full_history {
        next.history = history;
    }
    next.is_loading = false;

    let Some(raw) = new_dialogue.filter(|line| !line.trim().is_empty()) else {
        return halt_with_error(next, &SessionError::MissingDialogue, stamp);
    };

    let message = Message::dialogue(stamp.id.clone(), dialogue::parse_line(&raw), stamp.at);
    let display = message.display_text();
    next.messages.push(message);
    next.round_count += 1;
    next.phase = SessionPhase::RevealingMessage {
        message_id: stamp.id.clone(),
    };

    TransitionResult::new(next).with_effect(Effect::RevealMessage {
        message_id: stamp.id.clone(),
        display,
    })
}

fn animation_finished(
    state: &SessionState,
    context: &SessionContext,
    message_id: &str,
) -> TransitionResult {
    let Some(index) = state
        .messages
        .iter()
        .position(|m| m.id == message_id && !m.is_animated)
    else {
        // Unknown or already revealed
        return TransitionResult::unchanged(state);
    };

    let mut next = state.clone();
    next.messages[index].is_animated = true;

    match &next.phase {
        SessionPhase::RevealingMessage { message_id: revealing } if revealing == message_id => {
            continue_round(next, context)
        }
        _ => TransitionResult::new(next),
    }
}

fn choice_selected(
    state: &SessionState,
    text: String,
    stamp: &Stamp,
) -> Result<TransitionResult, TransitionError> {
    if state.is_paused {
        return Ok(TransitionResult::unchanged(state));
    }
    if state.phase.is_request_in_flight() {
        return Err(TransitionError::Busy);
    }

    let mut next = state.clone();
    // Shown immediately; the server adds the matching turn to history
    next.messages
        .push(Message::user(stamp.id.clone(), text.clone(), stamp.at));
    next.choices.clear();
    next.round_count = 0;
    next.is_generating = true;
    Ok(fetch_dialogue(next, text, true))
}

fn toggle_pause(state: &SessionState, context: &SessionContext) -> TransitionResult {
    let mut next = state.clone();
    next.is_paused = !state.is_paused;
    next.is_generating = !next.is_paused;

    if !next.phase.is_settled() {
        // Whatever is pending will observe the new flags when it completes
        return TransitionResult::new(next);
    }

    if next.is_paused {
        next.phase = SessionPhase::Paused;
        return TransitionResult::new(next);
    }

    if let SessionPhase::PausedBeforeDialogue {
        attempt,
        user_message,
        show_loading,
    } = next.phase.clone()
    {
        request_dialogue(next, user_message, show_loading, attempt)
    } else if next.history.is_empty() {
        next.phase = SessionPhase::Idle;
        TransitionResult::new(next)
    } else if !next.choices.is_empty() {
        next.phase = SessionPhase::ChoicesReady;
        TransitionResult::new(next)
    } else if next.round_count > 0 && next.round_count < context.max_rounds {
        continue_round(next, context)
    } else {
        request_choices(next)
    }
}

/// Decide what follows a revealed line
fn continue_round(mut next: SessionState, context: &SessionContext) -> TransitionResult {
    if next.is_paused {
        next.phase = SessionPhase::Paused;
        TransitionResult::new(next)
    } else if !next.is_generating {
        next.phase = SessionPhase::Idle;
        TransitionResult::new(next)
    } else if next.round_count < context.max_rounds {
        next.phase = SessionPhase::Advancing;
        TransitionResult::new(next).with_effect(Effect::ScheduleAdvance {
            delay: context.timing.inter_message_delay,
        })
    } else {
        request_choices(next)
    }
}

fn fetch_dialogue(next: SessionState, user_message: String, show_loading: bool) -> TransitionResult {
    request_dialogue(next, user_message, show_loading, FIRST_ATTEMPT)
}

/// Send a dialogue request, or hold it until the reader resumes
fn request_dialogue(
    mut next: SessionState,
    user_message: String,
    show_loading: bool,
    attempt: u32,
) -> TransitionResult {
    if next.is_paused {
        next.is_loading = false;
        next.phase = SessionPhase::PausedBeforeDialogue {
            attempt,
            user_message,
            show_loading,
        };
        return TransitionResult::new(next);
    }
    if show_loading {
        next.is_loading = true;
    }
    next.phase = SessionPhase::AwaitingDialogue {
        attempt,
        user_message: user_message.clone(),
        show_loading,
    };
    TransitionResult::new(next).with_effect(Effect::request_dialogue(user_message, attempt))
}

fn request_choices(mut next: SessionState) -> TransitionResult {
    if next.is_paused {
        next.phase = SessionPhase::Paused;
        return TransitionResult::new(next);
    }
    next.choices.clear();
    next.is_loading = true;
    next.is_generating = false;
    next.phase = SessionPhase::AwaitingChoices;
    TransitionResult::new(next).with_effect(Effect::RequestChoices)
}

/// Show the failure in the chat log and stop auto-generation
fn halt_with_error(mut next: SessionState, error: &SessionError, stamp: &Stamp) -> TransitionResult {
    next.messages
        .push(Message::system(stamp.id.clone(), error.chat_text(), stamp.at));
    next.is_generating = false;
    next.is_loading = false;
    next.phase = SessionPhase::Halted;
    TransitionResult::new(next)
}
