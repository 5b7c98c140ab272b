//! Mock implementations for testing
//!
//! These mocks enable runtime tests without real I/O.

use super::{DispatchError, SessionManager, SessionUpdate, StorySelection};
use crate::identity::StaticIdentity;
use crate::preset::{PresetError, PresetProvider, StoryPreset};
use crate::progress::{InMemoryProgress, ProgressStore};
use crate::state_machine::{Event, SessionPhase, SessionState, SessionTiming};
use crate::story::{
    BackendError, CharacterRoles, ChoicesRequest, ConversationTurn, DialogueLineResponse,
    DialogueRequest, StartStoryRequest, StoryBackend, StoryStart,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Mock Story Backend
// ============================================================================

/// Mock backend that returns queued responses per endpoint
#[derive(Default)]
pub struct MockBackend {
    starts: Mutex<VecDeque<Result<StoryStart, BackendError>>>,
    dialogues: Mutex<VecDeque<Result<DialogueLineResponse, BackendError>>>,
    choices: Mutex<VecDeque<Result<Vec<String>, BackendError>>>,
    /// Served once the dialogue queue is empty
    fallback_line: Option<String>,
    /// Served once the choices queue is empty
    fallback_choices: Option<Vec<String>>,
    /// Holds every dialogue request in flight this long
    dialogue_delay: Duration,
    /// Record of all requests made
    pub start_requests: Mutex<Vec<StartStoryRequest>>,
    pub dialogue_requests: Mutex<Vec<DialogueRequest>>,
    pub choice_requests: Mutex<Vec<ChoicesRequest>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fallback_line(mut self, line: impl Into<String>) -> Self {
        self.fallback_line = Some(line.into());
        self
    }

    pub fn with_fallback_choices(mut self, choices: &[&str]) -> Self {
        self.fallback_choices = Some(choices.iter().map(ToString::to_string).collect());
        self
    }

    pub fn with_dialogue_delay(mut self, delay: Duration) -> Self {
        self.dialogue_delay = delay;
        self
    }

    pub fn queue_start(&self, history: Vec<ConversationTurn>) {
        self.starts.lock().unwrap().push_back(Ok(StoryStart {
            history,
            character_roles: None,
        }));
    }

    pub fn queue_start_error(&self, error: BackendError) {
        self.starts.lock().unwrap().push_back(Err(error));
    }

    pub fn queue_line(&self, line: impl Into<String>) {
        self.dialogues
            .lock()
            .unwrap()
            .push_back(Ok(DialogueLineResponse {
                new_dialogue: Some(line.into()),
                full_history: None,
            }));
    }

    pub fn queue_dialogue_error(&self, error: BackendError) {
        self.dialogues.lock().unwrap().push_back(Err(error));
    }

    pub fn queue_choices(&self, choices: &[&str]) {
        self.choices
            .lock()
            .unwrap()
            .push_back(Ok(choices.iter().map(ToString::to_string).collect()));
    }

    pub fn recorded_starts(&self) -> Vec<StartStoryRequest> {
        self.start_requests.lock().unwrap().clone()
    }

    pub fn recorded_dialogues(&self) -> Vec<DialogueRequest> {
        self.dialogue_requests.lock().unwrap().clone()
    }

    pub fn recorded_choices(&self) -> Vec<ChoicesRequest> {
        self.choice_requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl StoryBackend for MockBackend {
    async fn start_or_continue_story(
        &self,
        request: &StartStoryRequest,
    ) -> Result<StoryStart, BackendError> {
        self.start_requests.lock().unwrap().push(request.clone());
        self.starts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(BackendError::network("No mock response queued")))
    }

    async fn get_next_dialogue(
        &self,
        request: &DialogueRequest,
    ) -> Result<DialogueLineResponse, BackendError> {
        self.dialogue_requests.lock().unwrap().push(request.clone());
        if !self.dialogue_delay.is_zero() {
            tokio::time::sleep(self.dialogue_delay).await;
        }
        let queued = self.dialogues.lock().unwrap().pop_front();
        queued.unwrap_or_else(|| match &self.fallback_line {
            Some(line) => Ok(DialogueLineResponse {
                new_dialogue: Some(line.clone()),
                full_history: None,
            }),
            None => Err(BackendError::network("No mock response queued")),
        })
    }

    async fn generate_choices(
        &self,
        request: &ChoicesRequest,
    ) -> Result<Vec<String>, BackendError> {
        self.choice_requests.lock().unwrap().push(request.clone());
        let queued = self.choices.lock().unwrap().pop_front();
        queued.unwrap_or_else(|| {
            self.fallback_choices
                .clone()
                .ok_or_else(|| BackendError::network("No mock response queued"))
        })
    }
}

// ============================================================================
// Static Presets
// ============================================================================

/// Fixed in-memory preset list
pub struct StaticPresets(pub Arc<Vec<StoryPreset>>);

#[async_trait]
impl PresetProvider for StaticPresets {
    async fn story_presets(&self) -> Result<Arc<Vec<StoryPreset>>, PresetError> {
        Ok(Arc::clone(&self.0))
    }
}

pub fn castle_preset() -> StoryPreset {
    StoryPreset {
        id: "castle".to_string(),
        title: "The Castle".to_string(),
        description: "A siege".to_string(),
        system_prompt: "You narrate a siege.".to_string(),
        cover_image_url: None,
        genres: vec!["Fantasy".to_string(), "War".to_string()],
        intro_video_url: Some("https://example.invalid/castle.mp4".to_string()),
        character_roles: CharacterRoles::from([("Ava".to_string(), "the knight".to_string())]),
        initial_history: vec![ConversationTurn::model("Narrator: The gates shake.")],
    }
}

// ============================================================================
// Test Harness
// ============================================================================

/// Timing fast enough for tests
pub fn fast_timing() -> SessionTiming {
    SessionTiming {
        inter_message_delay: Duration::from_millis(1),
        retry_delay: Duration::from_millis(5),
        reveal_char_delay: Duration::from_millis(1),
    }
}

/// Manager wired to mocks
pub struct TestHarness {
    pub manager: SessionManager,
    pub backend: Arc<MockBackend>,
    pub progress: Arc<InMemoryProgress>,
}

impl TestHarness {
    pub fn new(backend: MockBackend) -> Self {
        Self::with_user(backend, Some("u1"))
    }

    pub fn with_user(backend: MockBackend, user_id: Option<&str>) -> Self {
        let backend = Arc::new(backend);
        let progress = Arc::new(InMemoryProgress::new());
        let manager = SessionManager::new(
            backend.clone(),
            Arc::new(StaticPresets(Arc::new(vec![castle_preset()]))),
            Arc::new(StaticIdentity::new(user_id.map(str::to_string))),
            progress.clone(),
        )
        .with_timing(fast_timing());
        Self {
            manager,
            backend,
            progress,
        }
    }

    /// Wait until the session state satisfies `predicate`
    pub async fn wait_for(
        &self,
        session_id: &str,
        timeout: Duration,
        predicate: impl FnMut(&SessionState) -> bool,
    ) -> Option<SessionState> {
        let mut rx = self.manager.watch(session_id).await.ok()?;
        let state = match tokio::time::timeout(timeout, rx.wait_for(predicate)).await {
            Ok(Ok(state)) => Some(state.clone()),
            _ => None,
        };
        state
    }

    pub async fn wait_for_phase(&self, session_id: &str, phase: &SessionPhase) -> Option<SessionState> {
        self.wait_for(session_id, Duration::from_secs(2), |s| &s.phase == phase)
            .await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SessionError;
    use crate::state_machine::{TransitionError, MAX_ROUNDS};

    fn resumed_history(model_turns: usize) -> Vec<ConversationTurn> {
        let mut history = vec![ConversationTurn::system("You narrate a siege.")];
        for i in 0..model_turns {
            history.push(ConversationTurn::model(format!("Ava: Line {i}")));
        }
        history
    }

    #[tokio::test]
    async fn test_mock_backend_records_requests() {
        let mock = MockBackend::new();
        mock.queue_line("Ava: Hi");

        let request = DialogueRequest {
            user_id: "u1".to_string(),
            story_id: "castle".to_string(),
            conversation_history: vec![],
            user_message: String::new(),
            character_roles: CharacterRoles::new(),
        };
        let first = mock.get_next_dialogue(&request).await.unwrap();
        assert_eq!(first.new_dialogue.as_deref(), Some("Ava: Hi"));
        assert!(mock.get_next_dialogue(&request).await.is_err());
        assert_eq!(mock.recorded_dialogues().len(), 2);
    }

    /// New stories send the preset, hide the opening and go straight to choices
    #[tokio::test]
    async fn test_new_story_starts_with_choices() {
        let backend = MockBackend::new();
        backend.queue_start(vec![
            ConversationTurn::system("You narrate a siege."),
            ConversationTurn::model("Narrator: The gates shake."),
        ]);
        backend.queue_choices(&["Fight", "Flee"]);

        let rt = TestHarness::new(backend);
        let id = rt.manager.create_session("castle", true).await.unwrap();

        let state = rt
            .wait_for_phase(&id, &SessionPhase::ChoicesReady)
            .await
            .expect("choices should arrive");
        assert_eq!(state.choices, vec!["Fight", "Flee"]);
        assert!(state.messages.is_empty());
        assert!(!state.is_loading);
        assert_eq!(state.character_roles.get("Ava").unwrap(), "the knight");

        let starts = rt.backend.recorded_starts();
        assert_eq!(starts.len(), 1);
        assert_eq!(starts[0].system_prompt.as_deref(), Some("You narrate a siege."));
        assert_eq!(starts[0].initial_history.as_ref().map(Vec::len), Some(1));
        assert!(rt.backend.recorded_dialogues().is_empty());
        assert!(rt.progress.has_started("u1", "castle").await);
    }

    /// Resuming after an unanswered choice replays it once
    #[tokio::test]
    async fn test_resume_replays_pending_user_turn() {
        let backend = MockBackend::new();
        let mut history = resumed_history(MAX_ROUNDS as usize - 1);
        history.push(ConversationTurn::user("USER: Open the gate"));
        backend.queue_start(history);
        backend.queue_line("Ava: \"Never!\"");
        backend.queue_choices(&["Fight"]);

        let rt = TestHarness::new(backend);
        let id = rt.manager.create_session("castle", false).await.unwrap();
        rt.manager
            .send_event(&id, Event::begin_story())
            .await
            .unwrap();

        let state = rt
            .wait_for_phase(&id, &SessionPhase::ChoicesReady)
            .await
            .expect("round should end with choices");

        let starts = rt.backend.recorded_starts();
        assert!(starts[0].system_prompt.is_none());
        assert!(starts[0].initial_history.is_none());

        let dialogues = rt.backend.recorded_dialogues();
        assert_eq!(dialogues.len(), 1);
        assert_eq!(dialogues[0].user_message, "Open the gate");

        let last = state.messages.last().unwrap();
        assert_eq!(last.author, "Ava");
        assert_eq!(last.text, "Never!");
        assert!(last.is_animated);
    }

    /// A round runs ten lines on its own, then asks for choices
    #[tokio::test]
    async fn test_round_auto_advances_to_choices() {
        let backend = MockBackend::new()
            .with_fallback_line("Narrator: Rain.")
            .with_fallback_choices(&["Wait", "Run"]);
        backend.queue_start(vec![ConversationTurn::system("You narrate a siege.")]);

        let rt = TestHarness::new(backend);
        let id = rt.manager.create_session("castle", true).await.unwrap();
        rt.wait_for_phase(&id, &SessionPhase::ChoicesReady)
            .await
            .unwrap();

        rt.manager
            .send_event(&id, Event::choice_selected("Run"))
            .await
            .unwrap();

        let state = rt
            .wait_for(&id, Duration::from_secs(5), |s| {
                s.phase == SessionPhase::ChoicesReady && s.round_count == MAX_ROUNDS
            })
            .await
            .expect("round should complete");

        assert_eq!(state.messages.len(), 1 + MAX_ROUNDS as usize);
        assert_eq!(state.messages[0].author, "You");
        assert!(state.messages.iter().all(|m| m.is_animated));

        let dialogues = rt.backend.recorded_dialogues();
        assert_eq!(dialogues.len(), MAX_ROUNDS as usize);
        assert_eq!(dialogues[0].user_message, "Run");
        assert!(dialogues[1..].iter().all(|d| d.user_message.is_empty()));
        assert_eq!(rt.backend.recorded_choices().len(), 2);
    }

    /// 503 on the first attempt is retried once after the backoff
    #[tokio::test]
    async fn test_service_unavailable_retries_once() {
        let backend = MockBackend::new().with_fallback_choices(&["Wait"]);
        backend.queue_start(resumed_history(MAX_ROUNDS as usize - 1));

        let rt = TestHarness::new(backend);
        let id = rt.manager.create_session("castle", false).await.unwrap();
        rt.manager.send_event(&id, Event::begin_story()).await.unwrap();
        rt.wait_for_phase(&id, &SessionPhase::ChoicesReady)
            .await
            .unwrap();

        // The first fetch after the choice fails the same way twice
        rt.backend
            .queue_dialogue_error(BackendError::service_unavailable("busy"));
        rt.backend
            .queue_dialogue_error(BackendError::service_unavailable("still busy"));
        rt.manager
            .send_event(&id, Event::choice_selected("Wait"))
            .await
            .unwrap();

        let state = rt
            .wait_for_phase(&id, &SessionPhase::Halted)
            .await
            .expect("second 503 should halt");
        let last = state.messages.last().unwrap();
        assert_eq!(last.author, "System");
        assert_eq!(last.text, "Error 503: still busy. The story couldn't continue.");
        assert!(!state.is_generating);
        assert_eq!(rt.backend.recorded_dialogues().len(), 2);
    }

    #[tokio::test]
    async fn test_second_choice_while_fetching_is_busy() {
        let backend = MockBackend::new()
            .with_fallback_choices(&["Fight", "Flee"])
            .with_dialogue_delay(Duration::from_millis(300))
            .with_fallback_line("Ava: Hold.");
        backend.queue_start(vec![ConversationTurn::system("You narrate a siege.")]);

        let rt = TestHarness::new(backend);
        let id = rt.manager.create_session("castle", true).await.unwrap();
        rt.wait_for_phase(&id, &SessionPhase::ChoicesReady)
            .await
            .unwrap();

        rt.manager
            .send_event(&id, Event::choice_selected("Fight"))
            .await
            .unwrap();
        let second = rt
            .manager
            .send_event(&id, Event::choice_selected("Flee"))
            .await;

        assert!(matches!(
            second,
            Err(DispatchError::Rejected(TransitionError::Busy))
        ));
        assert_eq!(rt.backend.recorded_dialogues().len(), 1);
    }

    #[tokio::test]
    async fn test_choice_while_paused_is_ignored() {
        let backend = MockBackend::new().with_fallback_choices(&["Fight"]);
        backend.queue_start(vec![ConversationTurn::system("You narrate a siege.")]);

        let rt = TestHarness::new(backend);
        let id = rt.manager.create_session("castle", true).await.unwrap();
        rt.wait_for_phase(&id, &SessionPhase::ChoicesReady)
            .await
            .unwrap();

        rt.manager.send_event(&id, Event::TogglePause).await.unwrap();
        rt.manager
            .send_event(&id, Event::choice_selected("Fight"))
            .await
            .unwrap();

        let state = rt.manager.snapshot(&id).await.unwrap();
        assert!(state.is_paused);
        assert_eq!(state.phase, SessionPhase::Paused);
        assert_eq!(state.choices, vec!["Fight"]);
        assert!(rt.backend.recorded_dialogues().is_empty());

        rt.manager.send_event(&id, Event::TogglePause).await.unwrap();
        let state = rt.manager.snapshot(&id).await.unwrap();
        assert_eq!(state.phase, SessionPhase::ChoicesReady);
    }

    #[tokio::test]
    async fn test_begin_without_user_asks_for_login() {
        let rt = TestHarness::with_user(MockBackend::new(), None);
        let id = rt.manager.create_session("castle", true).await.unwrap();

        let state = rt
            .wait_for_phase(&id, &SessionPhase::Halted)
            .await
            .unwrap();
        assert_eq!(
            state.messages[0].text,
            "Authentication required. Please log in to begin a story."
        );
        assert!(rt.backend.recorded_starts().is_empty());
    }

    #[tokio::test]
    async fn test_start_failure_is_reported_in_chat() {
        let backend = MockBackend::new();
        backend.queue_start_error(BackendError::http(500, "database down"));
        let rt = TestHarness::new(backend);
        let id = rt.manager.create_session("castle", true).await.unwrap();

        let state = rt
            .wait_for_phase(&id, &SessionPhase::Halted)
            .await
            .unwrap();
        assert_eq!(
            state.messages[0].text,
            "Error 500: database down. The story couldn't continue."
        );
        assert!(!state.is_loading);
        assert!(!rt.progress.has_started("u1", "castle").await);
    }

    #[tokio::test]
    async fn test_missing_preset_is_reported_in_chat() {
        let rt = TestHarness::new(MockBackend::new());
        let id = rt.manager.create_session("atlantis", true).await.unwrap();

        let state = rt
            .wait_for_phase(&id, &SessionPhase::Halted)
            .await
            .unwrap();
        assert!(state.messages[0].text.contains("atlantis"));
        assert!(rt.backend.recorded_starts().is_empty());
    }

    #[tokio::test]
    async fn test_reveal_frames_end_with_full_text() {
        let backend = MockBackend::new().with_fallback_choices(&["Go"]);
        backend.queue_start(resumed_history(MAX_ROUNDS as usize));
        let rt = TestHarness::new(backend);

        // Resume at the limit, then pick a choice to trigger one line
        let id = rt.manager.create_session("castle", false).await.unwrap();
        rt.manager.send_event(&id, Event::begin_story()).await.unwrap();
        rt.wait_for_phase(&id, &SessionPhase::ChoicesReady)
            .await
            .unwrap();

        rt.backend.queue_line("Narrator: Dawn");
        let (_, mut updates) = rt.manager.subscribe(&id).await.unwrap();
        rt.manager
            .send_event(&id, Event::choice_selected("Go"))
            .await
            .unwrap();

        let mut frames = Vec::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while tokio::time::Instant::now() < deadline {
            match tokio::time::timeout(Duration::from_millis(50), updates.recv()).await {
                Ok(Ok(SessionUpdate::Reveal { shown, .. })) => {
                    let done = shown == "(Dawn)";
                    frames.push(shown);
                    if done {
                        break;
                    }
                }
                Ok(Ok(_)) => continue,
                _ => continue,
            }
        }

        assert_eq!(frames.first().map(String::as_str), Some("("));
        assert_eq!(frames.last().map(String::as_str), Some("(Dawn)"));
        assert_eq!(frames.len(), "(Dawn)".len());
    }

    #[tokio::test]
    async fn test_close_session_stops_pending_work() {
        let backend = MockBackend::new()
            .with_dialogue_delay(Duration::from_millis(200))
            .with_fallback_line("Ava: Too late.");
        let mut history = resumed_history(3);
        history.push(ConversationTurn::user("USER: Knock"));
        backend.queue_start(history);
        let rt = TestHarness::new(backend);

        let id = rt.manager.create_session("castle", false).await.unwrap();
        let mut watch = rt.manager.watch(&id).await.unwrap();
        rt.manager.send_event(&id, Event::begin_story()).await.unwrap();
        let in_flight = rt
            .wait_for(&id, Duration::from_secs(1), |s| {
                matches!(s.phase, SessionPhase::AwaitingDialogue { .. })
            })
            .await;
        assert!(in_flight.is_some());

        rt.manager.close_session(&id).await.unwrap();

        assert!(matches!(
            rt.manager.snapshot(&id).await,
            Err(SessionError::SessionNotFound(_))
        ));
        assert!(matches!(
            rt.manager.send_event(&id, Event::TogglePause).await,
            Err(DispatchError::Session(SessionError::SessionNotFound(_)))
        ));

        // The runtime drops its sender once it stops
        let closed = tokio::time::timeout(Duration::from_secs(1), async {
            while watch.changed().await.is_ok() {}
        })
        .await;
        assert!(closed.is_ok());
        assert!(watch
            .borrow()
            .messages
            .iter()
            .all(|m| m.text != "Too late."));
    }

    #[tokio::test]
    async fn test_idle_sessions_are_reaped() {
        let manager = TestHarness::new(MockBackend::new())
            .manager
            .with_idle_timeout(Duration::ZERO);
        let watched = manager.create_session("castle", false).await.unwrap();
        let idle = manager.create_session("castle", false).await.unwrap();
        let (_, _stream) = manager.subscribe(&watched).await.unwrap();

        assert_eq!(manager.reap_idle_sessions().await, 1);
        assert!(matches!(
            manager.snapshot(&idle).await,
            Err(SessionError::SessionNotFound(_))
        ));
        assert!(manager.snapshot(&watched).await.is_ok());
    }

    #[tokio::test]
    async fn test_recent_sessions_survive_reaping() {
        let rt = TestHarness::new(MockBackend::new());
        let id = rt.manager.create_session("castle", false).await.unwrap();

        assert_eq!(rt.manager.reap_idle_sessions().await, 0);
        assert!(rt.manager.snapshot(&id).await.is_ok());
    }

    #[tokio::test]
    async fn test_reaper_stops_with_manager() {
        let manager = Arc::new(
            TestHarness::new(MockBackend::new())
                .manager
                .with_idle_timeout(Duration::ZERO),
        );
        let id = manager.create_session("castle", false).await.unwrap();
        let reaper = manager.spawn_reaper(Duration::from_millis(5));

        let reaped = tokio::time::timeout(Duration::from_secs(1), async {
            while manager.snapshot(&id).await.is_ok() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(reaped.is_ok());

        drop(manager);
        let stopped = tokio::time::timeout(Duration::from_secs(1), reaper).await;
        assert!(matches!(stopped, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn test_select_story_destination() {
        let rt = TestHarness::new(MockBackend::new());

        assert_eq!(
            rt.manager.select_story("castle").await.unwrap(),
            StorySelection::Video {
                story_id: "castle".to_string(),
                intro_video_url: Some("https://example.invalid/castle.mp4".to_string()),
            }
        );

        rt.progress.mark_started("u1", "castle").await;
        assert_eq!(
            rt.manager.select_story("castle").await.unwrap(),
            StorySelection::Chat {
                story_id: "castle".to_string()
            }
        );

        assert!(matches!(
            rt.manager.select_story("atlantis").await,
            Err(SessionError::PresetNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_stories_by_genre() {
        let rt = TestHarness::new(MockBackend::new());
        let genres = rt.manager.list_stories().await.unwrap();
        let names: Vec<&String> = genres.keys().collect();
        assert_eq!(names, vec!["Fantasy", "War"]);
        assert_eq!(genres["War"][0].id, "castle");
    }
}
