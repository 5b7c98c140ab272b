//! Runtime for executing story sessions
//!
//! Each session runs as its own task that owns the state and executes
//! effects. The manager keeps a handle per live session.

mod executor;

#[cfg(test)]
pub mod testing;

pub use executor::SessionRuntime;

use crate::error::SessionError;
use crate::identity::IdentityProvider;
use crate::preset::{group_by_genre, PresetProvider, StoryPreset};
use crate::progress::ProgressStore;
use crate::state_machine::{Event, SessionContext, SessionState, SessionTiming, TransitionError};
use crate::story::StoryBackend;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch, RwLock};
use tokio_util::sync::CancellationToken;

/// Sessions nobody touched or watched for this long are closed
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Type alias for production runtime with trait-object collaborators
pub type ProductionRuntime = SessionRuntime<Arc<dyn StoryBackend>, Arc<dyn PresetProvider>>;

/// Updates sent to session observers
#[derive(Debug, Clone)]
pub enum SessionUpdate {
    /// Full state after a change
    Snapshot { state: Box<SessionState> },
    /// One frame of a message being revealed
    Reveal { message_id: String, shown: String },
    /// A reader action was rejected
    Error { message: String },
}

/// Where the UI goes after a story is picked
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "destination", rename_all = "snake_case")]
pub enum StorySelection {
    /// Already started: resume in the chat
    Chat { story_id: String },
    /// First time: play the intro, then open the chat as a new story
    Video {
        story_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        intro_video_url: Option<String>,
    },
}

/// Failure to deliver a reader action to a session
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Rejected(#[from] TransitionError),
}

/// Event plus an optional slot for the transition outcome
#[derive(Debug)]
pub struct SessionCommand {
    pub event: Event,
    pub reply: Option<oneshot::Sender<Result<(), TransitionError>>>,
}

impl From<Event> for SessionCommand {
    fn from(event: Event) -> Self {
        Self { event, reply: None }
    }
}

/// Handle to interact with a running session
struct SessionHandle {
    story_id: String,
    command_tx: mpsc::Sender<SessionCommand>,
    broadcast_tx: broadcast::Sender<SessionUpdate>,
    snapshot_rx: watch::Receiver<SessionState>,
    cancel: CancellationToken,
    last_activity: Mutex<Instant>,
}

impl SessionHandle {
    fn touch(&self) {
        if let Ok(mut last) = self.last_activity.lock() {
            *last = Instant::now();
        }
    }

    /// Runtime gone, or no stream open and no request within `timeout`
    fn is_idle(&self, now: Instant, timeout: Duration) -> bool {
        if self.command_tx.is_closed() {
            return true;
        }
        if self.broadcast_tx.receiver_count() > 0 {
            return false;
        }
        self.last_activity
            .lock()
            .is_ok_and(|last| now.duration_since(*last) >= timeout)
    }
}

/// Manager for all live story sessions
pub struct SessionManager {
    backend: Arc<dyn StoryBackend>,
    presets: Arc<dyn PresetProvider>,
    identity: Arc<dyn IdentityProvider>,
    progress: Arc<dyn ProgressStore>,
    timing: SessionTiming,
    idle_timeout: Duration,
    sessions: RwLock<HashMap<String, SessionHandle>>,
}

impl SessionManager {
    pub fn new(
        backend: Arc<dyn StoryBackend>,
        presets: Arc<dyn PresetProvider>,
        identity: Arc<dyn IdentityProvider>,
        progress: Arc<dyn ProgressStore>,
    ) -> Self {
        Self {
            backend,
            presets,
            identity,
            progress,
            timing: SessionTiming::default(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_timing(mut self, timing: SessionTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Presets grouped by genre for the story picker
    pub async fn list_stories(&self) -> Result<BTreeMap<String, Vec<StoryPreset>>, SessionError> {
        let presets = self
            .presets
            .story_presets()
            .await
            .map_err(|e| SessionError::PresetUnavailable(e.to_string()))?;
        Ok(group_by_genre(&presets))
    }

    /// Decide whether a picked story resumes in the chat or starts with its intro
    pub async fn select_story(&self, story_id: &str) -> Result<StorySelection, SessionError> {
        let preset = self
            .presets
            .story_preset(story_id)
            .await
            .map_err(|e| SessionError::PresetUnavailable(e.to_string()))?
            .ok_or_else(|| SessionError::PresetNotFound(story_id.to_string()))?;

        let started = match self.identity.current_user_id() {
            Some(user_id) => self.progress.has_started(&user_id, story_id).await,
            None => false,
        };

        tracing::info!(story_id = %story_id, started, "Story selected");

        if started {
            Ok(StorySelection::Chat {
                story_id: preset.id,
            })
        } else {
            Ok(StorySelection::Video {
                story_id: preset.id,
                intro_video_url: preset.intro_video_url,
            })
        }
    }

    /// Spawn a session runtime. New stories begin right away.
    pub async fn create_session(
        &self,
        story_id: &str,
        is_new_story: bool,
    ) -> Result<String, SessionError> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let context = SessionContext::new(
            &session_id,
            story_id,
            self.identity.current_user_id(),
        )
        .with_timing(self.timing);
        let initial_state = SessionState::new(is_new_story);

        let (command_tx, command_rx) = mpsc::channel(32);
        let (broadcast_tx, _) = broadcast::channel(128);
        let (snapshot_tx, snapshot_rx) = watch::channel(initial_state.clone());
        let cancel = CancellationToken::new();

        let runtime: ProductionRuntime = SessionRuntime::new(
            context,
            initial_state,
            self.backend.clone(),
            self.presets.clone(),
            self.progress.clone(),
            command_rx,
            command_tx.clone(),
            broadcast_tx.clone(),
            snapshot_tx,
            cancel.clone(),
        );

        let id = session_id.clone();
        tokio::spawn(async move {
            runtime.run().await;
            tracing::info!(session_id = %id, "Session runtime finished");
        });

        if is_new_story {
            command_tx
                .send(Event::begin_story().into())
                .await
                .map_err(|_| SessionError::SessionClosed)?;
        }

        tracing::info!(
            session_id = %session_id,
            story_id = %story_id,
            is_new_story,
            "Session created"
        );

        self.sessions.write().await.insert(
            session_id.clone(),
            SessionHandle {
                story_id: story_id.to_string(),
                command_tx,
                broadcast_tx,
                snapshot_rx,
                cancel,
                last_activity: Mutex::new(Instant::now()),
            },
        );

        Ok(session_id)
    }

    /// Deliver a reader action and wait for the machine to accept it
    pub async fn send_event(&self, session_id: &str, event: Event) -> Result<(), DispatchError> {
        let command_tx = {
            let sessions = self.sessions.read().await;
            let handle = sessions
                .get(session_id)
                .ok_or_else(|| SessionError::SessionNotFound(session_id.to_string()))?;
            handle.touch();
            handle.command_tx.clone()
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        command_tx
            .send(SessionCommand {
                event,
                reply: Some(reply_tx),
            })
            .await
            .map_err(|_| SessionError::SessionClosed)?;

        reply_rx.await.map_err(|_| SessionError::SessionClosed)??;
        Ok(())
    }

    /// Current state plus a receiver for everything after it
    pub async fn subscribe(
        &self,
        session_id: &str,
    ) -> Result<(SessionState, broadcast::Receiver<SessionUpdate>), SessionError> {
        let sessions = self.sessions.read().await;
        let handle = sessions
            .get(session_id)
            .ok_or_else(|| SessionError::SessionNotFound(session_id.to_string()))?;
        handle.touch();
        // Subscribe first so nothing published after the snapshot is missed
        let rx = handle.broadcast_tx.subscribe();
        let state = handle.snapshot_rx.borrow().clone();
        Ok((state, rx))
    }

    pub async fn snapshot(&self, session_id: &str) -> Result<SessionState, SessionError> {
        let sessions = self.sessions.read().await;
        let handle = sessions
            .get(session_id)
            .ok_or_else(|| SessionError::SessionNotFound(session_id.to_string()))?;
        handle.touch();
        let state = handle.snapshot_rx.borrow().clone();
        Ok(state)
    }

    /// Watch the state of a session
    #[cfg(test)]
    pub async fn watch(&self, session_id: &str) -> Result<watch::Receiver<SessionState>, SessionError> {
        let sessions = self.sessions.read().await;
        sessions
            .get(session_id)
            .map(|handle| handle.snapshot_rx.clone())
            .ok_or_else(|| SessionError::SessionNotFound(session_id.to_string()))
    }

    /// Stop a session. Pending requests, timers and reveals are dropped.
    pub async fn close_session(&self, session_id: &str) -> Result<(), SessionError> {
        let handle = self
            .sessions
            .write()
            .await
            .remove(session_id)
            .ok_or_else(|| SessionError::SessionNotFound(session_id.to_string()))?;
        handle.cancel.cancel();
        tracing::info!(
            session_id = %session_id,
            story_id = %handle.story_id,
            "Session closed"
        );
        Ok(())
    }

    /// Close sessions whose runtime stopped or that sat idle past the timeout
    pub async fn reap_idle_sessions(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;
        let idle: Vec<String> = sessions
            .iter()
            .filter(|(_, handle)| handle.is_idle(now, self.idle_timeout))
            .map(|(id, _)| id.clone())
            .collect();

        for id in &idle {
            if let Some(handle) = sessions.remove(id) {
                handle.cancel.cancel();
                tracing::info!(
                    session_id = %id,
                    story_id = %handle.story_id,
                    "Closed idle session"
                );
            }
        }
        idle.len()
    }

    /// Reap idle sessions every `interval` until the manager is dropped
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let manager = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(manager) = manager.upgrade() else {
                    tracing::debug!("Session manager dropped, reaper exiting");
                    break;
                };
                manager.reap_idle_sessions().await;
            }
        })
    }

    /// Cancel every live session
    pub async fn shutdown(&self) {
        let mut sessions = self.sessions.write().await;
        for (_, handle) in sessions.drain() {
            handle.cancel.cancel();
        }
    }
}
