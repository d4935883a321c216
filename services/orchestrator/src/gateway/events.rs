//! Webhook room events and room naming conventions.

use std::str::FromStr;

use callhub_id::CallId;
use serde::{Deserialize, Serialize};

/// Room name prefix for outbound SIP calls.
pub const SIP_CALL_ROOM_PREFIX: &str = "sip-call-";

/// Room name prefix for calls placed through the call API.
pub const CALL_ROOM_PREFIX: &str = "call-";

/// Identity prefix of the phone-side participant.
pub const CUSTOMER_IDENTITY_PREFIX: &str = "customer-";

/// Room name for an outbound SIP call.
pub fn room_name_for_call(call_id: &CallId) -> String {
    format!("{SIP_CALL_ROOM_PREFIX}{call_id}")
}

/// Participant identity for the customer leg of a call.
pub fn customer_identity(call_id: &CallId) -> String {
    format!("{CUSTOMER_IDENTITY_PREFIX}{call_id}")
}

pub fn is_customer_identity(identity: &str) -> bool {
    identity.starts_with(CUSTOMER_IDENTITY_PREFIX)
}

/// Resolve the call bound to a room by stripping the room prefix.
///
/// Returns `None` for rooms outside the call naming scheme or with a
/// malformed call id suffix.
pub fn call_id_from_room(room_name: &str) -> Option<CallId> {
    let suffix = room_name
        .strip_prefix(SIP_CALL_ROOM_PREFIX)
        .or_else(|| room_name.strip_prefix(CALL_ROOM_PREFIX))?;
    CallId::from_str(suffix).ok()
}

/// Kind of room event delivered by the platform webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomEventKind {
    ParticipantJoined,
    ParticipantLeft,
    RoomStarted,
    RoomFinished,
    TrackPublished,
    TrackUnpublished,
    #[serde(other)]
    Other,
}

impl RoomEventKind {
    pub fn is_track_event(&self) -> bool {
        matches!(
            self,
            RoomEventKind::TrackPublished | RoomEventKind::TrackUnpublished
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookRoom {
    pub name: String,
    #[serde(default)]
    pub sid: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookParticipant {
    #[serde(default)]
    pub identity: String,
    #[serde(default)]
    pub sid: Option<String>,
}

/// Webhook payload for a room event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomEvent {
    pub event: RoomEventKind,
    pub room: WebhookRoom,
    #[serde(default)]
    pub participant: Option<WebhookParticipant>,
    #[serde(default)]
    pub track: Option<serde_json::Value>,
}

impl RoomEvent {
    pub fn participant_identity(&self) -> Option<&str> {
        self.participant.as_ref().map(|p| p.identity.as_str())
    }

    /// Whether the event concerns the customer leg of the call.
    pub fn is_customer_event(&self) -> bool {
        self.participant_identity()
            .map(is_customer_identity)
            .unwrap_or(false)
    }

    pub fn track_type(&self) -> Option<&str> {
        self.track
            .as_ref()
            .and_then(|t| t.get("type"))
            .and_then(|t| t.as_str())
    }
}
