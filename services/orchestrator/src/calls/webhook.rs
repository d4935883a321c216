//! Call transitions driven by room webhook events.

use serde::Serialize;
use tracing::{debug, info};

use super::CallService;
use crate::error::Result;
use crate::gateway::{call_id_from_room, RoomEvent, RoomEventKind};
use crate::store::CallStatus;

/// What a webhook event did to the call bound to its room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum WebhookOutcome {
    /// The call moved to a new status.
    Applied { status: CallStatus },
    /// The event was valid but the call could not move (already closed).
    Conflict { detail: String },
    /// The room is not bound to a call or the event carries no transition.
    Ignored,
}

impl CallService {
    /// Apply a room event to the call named by the room.
    ///
    /// Only the customer leg answers or ends a call; agent and transfer
    /// participants come and go without touching call state.
    pub async fn apply_room_event(&self, event: &RoomEvent) -> Result<WebhookOutcome> {
        let Some(call_id) = call_id_from_room(&event.room.name) else {
            debug!(room_name = %event.room.name, "Room is not bound to a call");
            return Ok(WebhookOutcome::Ignored);
        };

        let result = match event.event {
            RoomEventKind::ParticipantJoined if event.is_customer_event() => {
                self.answer(&call_id).await
            }
            RoomEventKind::ParticipantLeft if event.is_customer_event() => {
                self.end(&call_id, None).await
            }
            RoomEventKind::RoomFinished => {
                let call = self.get(&call_id).await?;
                if call.status.is_terminal() {
                    return Ok(WebhookOutcome::Ignored);
                }
                self.end(&call_id, None).await
            }
            ref kind if kind.is_track_event() => {
                info!(
                    call_id = %call_id,
                    event = ?kind,
                    track_type = ?event.track_type(),
                    "Track event"
                );
                return Ok(WebhookOutcome::Ignored);
            }
            _ => return Ok(WebhookOutcome::Ignored),
        };

        match result {
            Ok(call) => {
                info!(call_id = %call_id, status = %call.status, event = ?event.event, "Call updated from room event");
                Ok(WebhookOutcome::Applied {
                    status: call.status,
                })
            }
            Err(e) if e.is_conflict() => Ok(WebhookOutcome::Conflict {
                detail: e.to_string(),
            }),
            Err(e) => Err(e),
        }
    }
}
