//! Server-Sent Events support

use super::types::SessionView;
use crate::runtime::SessionUpdate;
use crate::state_machine::SessionState;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

/// Convert broadcast stream to SSE stream, starting with the current snapshot
pub fn sse_stream(
    initial: SessionState,
    broadcast_rx: tokio::sync::broadcast::Receiver<SessionUpdate>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let init = futures::stream::once(async move {
        Ok(update_to_axum(SessionUpdate::Snapshot {
            state: Box::new(initial),
        }))
    });

    let broadcasts = BroadcastStream::new(broadcast_rx).filter_map(|result| match result {
        Ok(update) => Some(Ok(update_to_axum(update))),
        Err(_) => None, // Skip lagged messages
    });

    let combined = init.chain(broadcasts);

    Sse::new(combined).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

fn update_to_axum(update: SessionUpdate) -> Event {
    let (event_type, data) = match update {
        SessionUpdate::Snapshot { state } => (
            "snapshot",
            json!({
                "type": "snapshot",
                "session": SessionView::from(state.as_ref())
            }),
        ),
        SessionUpdate::Reveal { message_id, shown } => (
            "reveal",
            json!({
                "type": "reveal",
                "message_id": message_id,
                "shown": shown
            }),
        ),
        SessionUpdate::Error { message } => (
            "error",
            json!({
                "type": "error",
                "message": message
            }),
        ),
    };

    Event::default().event(event_type).data(data.to_string())
}
