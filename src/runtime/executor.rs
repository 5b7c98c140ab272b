//! Session runtime executor

use super::{SessionCommand, SessionUpdate};

use crate::dialogue::{reveal_stream, RevealStep};
use crate::error::SessionError;
use crate::preset::PresetProvider;
use crate::progress::ProgressStore;
use crate::state_machine::{
    transition, Effect, Event, SessionContext, SessionState, Stamp, TransitionError,
};
use crate::story::{ChoicesRequest, DialogueRequest, StartStoryRequest, StoryBackend};
use futures::StreamExt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Generic session runtime that can work with any backend and preset source
pub struct SessionRuntime<B, P>
where
    B: StoryBackend + 'static,
    P: PresetProvider + 'static,
{
    context: SessionContext,
    state: SessionState,
    backend: Arc<B>,
    presets: Arc<P>,
    progress: Arc<dyn ProgressStore>,
    command_rx: mpsc::Receiver<SessionCommand>,
    command_tx: mpsc::Sender<SessionCommand>,
    broadcast_tx: broadcast::Sender<SessionUpdate>,
    snapshot_tx: watch::Sender<SessionState>,
    /// Cancelled when the session closes; every spawned task is tied to it
    cancel: CancellationToken,
}

impl<B, P> SessionRuntime<B, P>
where
    B: StoryBackend + 'static,
    P: PresetProvider + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        context: SessionContext,
        state: SessionState,
        backend: B,
        presets: P,
        progress: Arc<dyn ProgressStore>,
        command_rx: mpsc::Receiver<SessionCommand>,
        command_tx: mpsc::Sender<SessionCommand>,
        broadcast_tx: broadcast::Sender<SessionUpdate>,
        snapshot_tx: watch::Sender<SessionState>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            context,
            state,
            backend: Arc::new(backend),
            presets: Arc::new(presets),
            progress,
            command_rx,
            command_tx,
            broadcast_tx,
            snapshot_tx,
            cancel,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(
            session_id = %self.context.session_id,
            story_id = %self.context.story_id,
            "Starting session runtime"
        );

        // Process events in a loop - no recursion
        loop {
            let command = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                command = self.command_rx.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };

            let SessionCommand { event, reply } = command;
            let result = self.process_event(event).await;
            match reply {
                Some(reply) => {
                    let _ = reply.send(result);
                }
                None => {
                    if let Err(e) = result {
                        tracing::warn!(
                            session_id = %self.context.session_id,
                            error = %e,
                            "Dropped event"
                        );
                    }
                }
            }
        }

        tracing::info!(session_id = %self.context.session_id, "Session runtime stopped");
    }

    async fn process_event(&mut self, event: Event) -> Result<(), TransitionError> {
        let result = match transition(&self.state, &self.context, event) {
            Ok(r) => r,
            Err(e) => {
                // Transition errors are reader-facing (e.g. "story is busy")
                let _ = self.broadcast_tx.send(SessionUpdate::Error {
                    message: e.to_string(),
                });
                return Err(e);
            }
        };

        if result.new_state != self.state {
            self.state = result.new_state;
            self.publish_snapshot();
        }

        for effect in result.effects {
            self.execute_effect(effect).await;
        }

        Ok(())
    }

    fn publish_snapshot(&self) {
        self.snapshot_tx.send_replace(self.state.clone());
        let _ = self.broadcast_tx.send(SessionUpdate::Snapshot {
            state: Box::new(self.state.clone()),
        });
    }

    /// Run `task` in the background and feed its event back in, unless the
    /// session closes first.
    fn spawn_tied<F>(&self, task: F)
    where
        F: Future<Output = Option<Event>> + Send + 'static,
    {
        let cancel = self.cancel.clone();
        let command_tx = self.command_tx.clone();
        tokio::spawn(async move {
            let event = tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                event = task => event,
            };
            if let Some(event) = event {
                let _ = command_tx.send(event.into()).await;
            }
        });
    }

    fn user_id(&self) -> Result<String, SessionError> {
        self.context
            .user_id
            .clone()
            .ok_or(SessionError::AuthenticationRequired)
    }

    async fn execute_effect(&self, effect: Effect) {
        match effect {
            Effect::StartStory { send_preset } => {
                let backend = self.backend.clone();
                let presets = self.presets.clone();
                let story_id = self.context.story_id.clone();
                let user_id = self.user_id();

                self.spawn_tied(async move {
                    let event = match start_story(&*backend, &*presets, user_id, story_id, send_preset).await {
                        Ok(event) => event,
                        Err(error) => Event::StartFailed {
                            error,
                            stamp: Stamp::now(),
                        },
                    };
                    Some(event)
                });
            }

            Effect::RequestDialogue {
                user_message,
                attempt,
            } => {
                let backend = self.backend.clone();
                let user_id = self.user_id();
                let story_id = self.context.story_id.clone();
                let conversation_history = self.state.history.clone();
                let character_roles = self.state.character_roles.clone();

                tracing::info!(
                    session_id = %self.context.session_id,
                    attempt,
                    user_message = %user_message,
                    "Requesting dialogue"
                );

                self.spawn_tied(async move {
                    let result = match user_id {
                        Ok(user_id) => {
                            let request = DialogueRequest {
                                user_id,
                                story_id,
                                conversation_history,
                                user_message,
                                character_roles,
                            };
                            backend
                                .get_next_dialogue(&request)
                                .await
                                .map_err(SessionError::from)
                        }
                        Err(e) => Err(e),
                    };
                    let stamp = Stamp::now();
                    Some(match result {
                        Ok(response) => Event::DialogueReceived {
                            new_dialogue: response.new_dialogue,
                            full_history: response.full_history,
                            stamp,
                        },
                        Err(error) => Event::DialogueFailed {
                            error,
                            attempt,
                            stamp,
                        },
                    })
                });
            }

            Effect::RequestChoices => {
                let backend = self.backend.clone();
                let user_id = self.user_id();
                let story_id = self.context.story_id.clone();
                let conversation_history = self.state.history.clone();

                self.spawn_tied(async move {
                    let result = match user_id {
                        Ok(user_id) => {
                            let request = ChoicesRequest {
                                user_id,
                                story_id,
                                conversation_history,
                            };
                            backend
                                .generate_choices(&request)
                                .await
                                .map_err(SessionError::from)
                        }
                        Err(e) => Err(e),
                    };
                    Some(match result {
                        Ok(choices) => Event::ChoicesReceived { choices },
                        Err(error) => Event::ChoicesFailed {
                            error,
                            stamp: Stamp::now(),
                        },
                    })
                });
            }

            Effect::ScheduleRetry { delay, attempt } => {
                tracing::info!(
                    session_id = %self.context.session_id,
                    attempt,
                    delay_ms = %delay.as_millis(),
                    "Backend unavailable, retrying"
                );
                self.spawn_tied(async move {
                    tokio::time::sleep(delay).await;
                    Some(Event::RetryTimeout { attempt })
                });
            }

            Effect::ScheduleAdvance { delay } => {
                self.spawn_tied(async move {
                    tokio::time::sleep(delay).await;
                    Some(Event::AdvanceTimeout)
                });
            }

            Effect::RevealMessage {
                message_id,
                display,
            } => {
                let broadcast_tx = self.broadcast_tx.clone();
                let delay = self.context.timing.reveal_char_delay;
                let frames = reveal_stream(&display, delay, self.cancel.child_token());

                self.spawn_tied(async move {
                    let mut frames = std::pin::pin!(frames);
                    while let Some(step) = frames.next().await {
                        match step {
                            RevealStep::Frame(shown) => {
                                let _ = broadcast_tx.send(SessionUpdate::Reveal {
                                    message_id: message_id.clone(),
                                    shown,
                                });
                            }
                            RevealStep::Complete => {
                                return Some(Event::AnimationFinished { message_id });
                            }
                        }
                    }
                    None
                });
            }

            Effect::MarkStarted => match &self.context.user_id {
                Some(user_id) => {
                    self.progress
                        .mark_started(user_id, &self.context.story_id)
                        .await;
                }
                None => {
                    tracing::debug!(
                        session_id = %self.context.session_id,
                        "No user, progress not recorded"
                    );
                }
            },
        }
    }
}

/// Load the preset and start or continue the story on the backend
async fn start_story<B, P>(
    backend: &B,
    presets: &P,
    user_id: Result<String, SessionError>,
    story_id: String,
    send_preset: bool,
) -> Result<Event, SessionError>
where
    B: StoryBackend + ?Sized,
    P: PresetProvider + ?Sized,
{
    let user_id = user_id?;
    let preset = presets
        .story_preset(&story_id)
        .await
        .map_err(|e| SessionError::PresetUnavailable(e.to_string()))?
        .ok_or_else(|| SessionError::PresetNotFound(story_id.clone()))?;

    let request = StartStoryRequest {
        user_id,
        story_id,
        system_prompt: send_preset.then(|| preset.system_prompt.clone()),
        initial_history: send_preset.then(|| preset.initial_history.clone()),
        character_roles: send_preset.then(|| preset.character_roles.clone()),
    };
    let start = backend.start_or_continue_story(&request).await?;

    // Server roles win; the preset's are the fallback
    let character_roles = start
        .character_roles
        .filter(|roles| !roles.is_empty())
        .unwrap_or(preset.character_roles);

    Ok(Event::StoryStarted {
        history: start.history,
        initial_history_len: preset.initial_history.len(),
        character_roles,
        stamp: Stamp::now(),
    })
}
