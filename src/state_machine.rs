//! Story session state machine
//!
//! Implements the Elm Architecture pattern with pure state transitions:
//! the executor in `runtime` performs the effects and feeds their outcome
//! back in as events.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;


pub use effect::Effect;
pub use event::{Event, Stamp};
pub use state::{Message, SessionContext, SessionPhase, SessionState, SessionTiming};
pub use transition::{transition, TransitionError};

#[cfg(test)]
pub use state::{project_history, MAX_ROUNDS};
#[cfg(test)]
pub use transition::TransitionResult;
