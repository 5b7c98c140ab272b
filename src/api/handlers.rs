//! HTTP request handlers

use super::sse::sse_stream;
use super::types::{
    AcceptedResponse, AnimationFinishedRequest, ChoiceRequest, CreateSessionRequest,
    CreateSessionResponse, ErrorResponse, SessionView, StoryListResponse, StorySummary,
    SuccessResponse,
};
use super::AppState;
use crate::error::SessionError;
use crate::runtime::{DispatchError, StorySelection};
use crate::state_machine::{Event, TransitionError};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Story picker
        .route("/api/stories", get(list_stories))
        .route("/api/stories/:id/select", post(select_story))
        // Sessions
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/:id", get(get_session))
        .route("/api/sessions/:id/stream", get(stream_session))
        // Reader actions
        .route("/api/sessions/:id/begin", post(begin_story))
        .route("/api/sessions/:id/choice", post(select_choice))
        .route("/api/sessions/:id/pause", post(toggle_pause))
        .route(
            "/api/sessions/:id/animation-finished",
            post(animation_finished),
        )
        // Lifecycle
        .route("/api/sessions/:id/close", post(close_session))
        // Version
        .route("/version", get(get_version))
        .with_state(state)
}

// ============================================================
// Story Picker
// ============================================================

async fn list_stories(State(state): State<AppState>) -> Result<Json<StoryListResponse>, AppError> {
    let grouped = state.sessions.list_stories().await?;
    let genres = grouped
        .into_iter()
        .map(|(genre, presets)| (genre, presets.iter().map(StorySummary::from).collect()))
        .collect();
    Ok(Json(StoryListResponse { genres }))
}

async fn select_story(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StorySelection>, AppError> {
    Ok(Json(state.sessions.select_story(&id).await?))
}

// ============================================================
// Sessions
// ============================================================

async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<Json<CreateSessionResponse>, AppError> {
    if req.story_id.trim().is_empty() {
        return Err(AppError::BadRequest("story_id is required".to_string()));
    }
    let session_id = state
        .sessions
        .create_session(&req.story_id, req.is_new_story)
        .await?;
    Ok(Json(CreateSessionResponse { session_id }))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionView>, AppError> {
    let snapshot = state.sessions.snapshot(&id).await?;
    Ok(Json(SessionView::from(&snapshot)))
}

async fn stream_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let (snapshot, broadcast_rx) = state.sessions.subscribe(&id).await?;
    Ok(sse_stream(snapshot, broadcast_rx))
}

async fn close_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>, AppError> {
    state.sessions.close_session(&id).await?;
    Ok(Json(SuccessResponse { success: true }))
}

// ============================================================
// Reader Actions
// ============================================================

async fn dispatch(state: &AppState, id: &str, event: Event) -> Result<Json<AcceptedResponse>, AppError> {
    state.sessions.send_event(id, event).await?;
    Ok(Json(AcceptedResponse { accepted: true }))
}

async fn begin_story(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AcceptedResponse>, AppError> {
    dispatch(&state, &id, Event::begin_story()).await
}

async fn select_choice(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ChoiceRequest>,
) -> Result<Json<AcceptedResponse>, AppError> {
    if req.text.trim().is_empty() {
        return Err(AppError::BadRequest("Choice text is required".to_string()));
    }
    dispatch(&state, &id, Event::choice_selected(req.text)).await
}

async fn toggle_pause(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AcceptedResponse>, AppError> {
    dispatch(&state, &id, Event::TogglePause).await
}

async fn animation_finished(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<AnimationFinishedRequest>,
) -> Result<Json<AcceptedResponse>, AppError> {
    dispatch(
        &state,
        &id,
        Event::AnimationFinished {
            message_id: req.message_id,
        },
    )
    .await
}

async fn get_version() -> &'static str {
    concat!("storyai ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::SessionNotFound(_) | SessionError::PresetNotFound(_) => {
                AppError::NotFound(err.to_string())
            }
            _ => AppError::Internal(err.to_string()),
        }
    }
}

impl From<DispatchError> for AppError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Session(e) => e.into(),
            DispatchError::Rejected(e @ TransitionError::Busy) => AppError::Conflict(e.to_string()),
            DispatchError::Rejected(e @ TransitionError::InvalidTransition(_)) => {
                AppError::BadRequest(e.to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
