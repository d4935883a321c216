//! Room/call gateway.
//!
//! The real-time platform hosts rooms (session containers) and bridges
//! phone calls into them as SIP participants. The orchestrator only ever
//! creates rooms and dials out; everything else arrives as webhook events.

mod events;
mod livekit;
mod mock;

pub use events::{
    call_id_from_room, customer_identity, is_customer_identity, room_name_for_call,
    RoomEvent, RoomEventKind, WebhookParticipant, WebhookRoom, CALL_ROOM_PREFIX,
    CUSTOMER_IDENTITY_PREFIX, SIP_CALL_ROOM_PREFIX,
};
pub use livekit::{LiveKitConfig, LiveKitGateway};
pub use mock::{GatewayCall, MockGateway};

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Gateway failures.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("room creation failed: {0}")]
    Room(String),

    #[error("sip participant creation failed: {0}")]
    Sip(String),

    #[error("gateway not configured: {0}")]
    NotConfigured(String),
}

/// Room lifetime limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomTimeouts {
    /// How long an empty room is kept before the platform closes it.
    pub empty_timeout: Duration,

    /// Agent, customer and room for transfers.
    pub max_participants: u32,
}

impl Default for RoomTimeouts {
    fn default() -> Self {
        Self {
            empty_timeout: Duration::from_secs(600),
            max_participants: 5,
        }
    }
}

/// Created room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub sid: String,
    pub name: String,
}

/// Outbound SIP dial request.
#[derive(Debug, Clone)]
pub struct SipDial {
    pub trunk_id: String,
    pub phone_number: String,
    pub room_name: String,
    pub participant_identity: String,
    pub participant_name: Option<String>,
    pub participant_metadata: Option<String>,
    pub ringing_timeout: Option<Duration>,
    pub max_call_duration: Option<Duration>,
}

/// SIP participant bridged into a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SipParticipant {
    pub participant_id: String,
    pub participant_identity: String,
    pub room_name: String,
    pub sip_call_id: String,
}

/// Capability to create rooms and dial phone numbers into them.
#[async_trait]
pub trait RoomGateway: Send + Sync {
    /// Create a room with JSON metadata.
    async fn create_room(
        &self,
        name: &str,
        metadata: &str,
        timeouts: RoomTimeouts,
    ) -> Result<RoomInfo, GatewayError>;

    /// Dial a phone number into an existing room.
    async fn create_sip_participant(&self, dial: &SipDial) -> Result<SipParticipant, GatewayError>;
}

/// Stand-in used when no platform credentials are configured. Every
/// operation fails, so outbound calls are recorded as failed.
#[derive(Debug, Clone, Default)]
pub struct UnconfiguredGateway;

#[async_trait]
impl RoomGateway for UnconfiguredGateway {
    async fn create_room(
        &self,
        _name: &str,
        _metadata: &str,
        _timeouts: RoomTimeouts,
    ) -> Result<RoomInfo, GatewayError> {
        Err(GatewayError::NotConfigured("LiveKit credentials are not set".to_string()))
    }

    async fn create_sip_participant(&self, _dial: &SipDial) -> Result<SipParticipant, GatewayError> {
        Err(GatewayError::NotConfigured("LiveKit credentials are not set".to_string()))
    }
}
