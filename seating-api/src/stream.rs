use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use futures_util::{Stream, StreamExt};
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/events/{event_seating_id}/stream", get(seat_stream))
}

/// Live seat-map feed for one event. Session ids are stripped before events
/// leave the process.
async fn seat_stream(
    State(state): State<AppState>,
    Path(event_seating_id): Path<i64>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.sse.subscribe();
    tracing::debug!(event_seating_id, "Seat stream opened");

    let stream = BroadcastStream::new(rx).filter_map(move |result| async move {
        match result {
            Ok(event) if event.event_seating_id == event_seating_id => {
                let mut public = event;
                public.session_id = None;
                match Event::default().event(public.topic.as_str()).json_data(&public) {
                    Ok(sse) => Some(Ok(sse)),
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to encode seat event");
                        None
                    }
                }
            }
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(event_seating_id, error = %e, "Seat stream lagging");
                None
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
