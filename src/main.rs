//! storyai - interactive story chat session engine
//!
//! Serves story sessions over HTTP: a pure session state machine driven by
//! a per-session runtime that talks to the dialogue backend.

mod api;
mod config;
mod dialogue;
mod error;
mod identity;
mod preset;
mod progress;
mod runtime;
mod state_machine;
mod story;

use api::{create_router, AppState};
use config::AppConfig;
use identity::{IdentityProvider, StaticIdentity};
use preset::FilePresetProvider;
use progress::InMemoryProgress;
use runtime::SessionManager;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use story::{HttpStoryBackend, LoggingBackend};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often idle sessions are looked for
const REAP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "storyai=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    // Configuration
    let config = AppConfig::from_env()?;

    // Collaborators
    let backend = HttpStoryBackend::new(&config.backend_url, config.request_timeout)?;
    let backend = Arc::new(LoggingBackend::new(Arc::new(backend)));
    tracing::info!(url = %config.backend_url, "Story backend configured");

    let presets = Arc::new(FilePresetProvider::new(&config.presets_path));
    let identity = Arc::new(StaticIdentity::new(config.user_id.clone()));
    if identity.current_user_id().is_none() {
        tracing::warn!("No user configured. Set STORYAI_USER_ID to start stories.");
    }

    let sessions = Arc::new(
        SessionManager::new(
            backend,
            presets,
            identity,
            Arc::new(InMemoryProgress::new()),
        )
        .with_timing(config.timing)
        .with_idle_timeout(config.session_idle_timeout),
    );
    let reaper = sessions.spawn_reaper(REAP_INTERVAL);

    // Create router
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let compression = CompressionLayer::new()
        .gzip(true)
        .br(true)
        .deflate(true)
        .zstd(true);

    let app = create_router(AppState::new(sessions.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(compression);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("storyai server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    reaper.abort();
    sessions.shutdown().await;
    tracing::info!("storyai server stopped");

    Ok(())
}
