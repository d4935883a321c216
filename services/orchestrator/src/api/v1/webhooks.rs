//! Room webhook ingestion.

use axum::{extract::State, routing::post, Json, Router};
use serde::Serialize;
use tracing::debug;

use crate::api::error::ApiError;
use crate::api::extract::ApiJson;
use crate::calls::WebhookOutcome;
use crate::gateway::RoomEvent;
use crate::routing::RoomActivity;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/room-events", post(room_event))
}

#[derive(Debug, Serialize)]
pub struct RoomEventResponse {
    pub call: WebhookOutcome,
    pub routing: RoomActivity,
}

/// POST /v1/webhooks/room-events
///
/// The event drives the call bound to the room and then the room's routing
/// entry.
async fn room_event(
    State(state): State<AppState>,
    ApiJson(event): ApiJson<RoomEvent>,
) -> Result<Json<RoomEventResponse>, ApiError> {
    debug!(room_name = %event.room.name, event = ?event.event, "Room webhook received");

    let call = match state.calls().apply_room_event(&event).await {
        Ok(outcome) => outcome,
        // Rooms named like call rooms but without a stored call.
        Err(e) if e.is_not_found() => {
            debug!(room_name = %event.room.name, error = %e, "No call for room");
            WebhookOutcome::Ignored
        }
        Err(e) => return Err(e.into()),
    };
    let routing = state
        .router()
        .handle_room_event(&event.room.name, &event.event)
        .await?;

    Ok(Json(RoomEventResponse { call, routing }))
}
