//! Live liquidity stream endpoint (server-sent events)

use axum::{
    extract::{Path, State},
    response::sse::{Event, Sse},
    routing::get,
    Router,
};
use futures_util::{Stream, StreamExt};
use market_core::StreamEvent;
use tracing::debug;

use crate::error::ApiError;
use crate::AppState;

/// Create stream routes
pub fn routes() -> Router<AppState> {
    Router::new().route("/markets/{id}/stream", get(stream_liquidity))
}

/// Stream `connected`, `liquidity-update` and `ping` events for one market
async fn stream_liquidity(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let events = state.streamer.open(&id).await?;
    debug!("Client attached to liquidity stream for {}", id);

    Ok(Sse::new(events.map(to_sse_event)))
}

fn to_sse_event(event: StreamEvent) -> Result<Event, axum::Error> {
    Event::default().event(event.event_name()).json_data(&event)
}
