//! LiveKit server API backend.

use async_trait::async_trait;
use livekit_api::services::room::{CreateRoomOptions, RoomClient};
use livekit_api::services::sip::{CreateSIPParticipantOptions, SIPClient};
use tracing::{debug, info};

use super::{GatewayError, RoomGateway, RoomInfo, RoomTimeouts, SipDial, SipParticipant};

/// LiveKit connection settings.
#[derive(Debug, Clone, Default)]
pub struct LiveKitConfig {
    pub url: String,
    pub api_key: String,
    pub api_secret: String,
}

impl LiveKitConfig {
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("LIVEKIT_URL").unwrap_or_default(),
            api_key: std::env::var("LIVEKIT_API_KEY").unwrap_or_default(),
            api_secret: std::env::var("LIVEKIT_API_SECRET").unwrap_or_default(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.url.is_empty() && !self.api_key.is_empty() && !self.api_secret.is_empty()
    }
}

/// Gateway backed by the LiveKit room and SIP services.
#[derive(Debug)]
pub struct LiveKitGateway {
    rooms: RoomClient,
    sip: SIPClient,
}

impl LiveKitGateway {
    pub fn new(config: &LiveKitConfig) -> Result<Self, GatewayError> {
        if !config.is_configured() {
            return Err(GatewayError::NotConfigured(
                "LIVEKIT_URL, LIVEKIT_API_KEY and LIVEKIT_API_SECRET must be set".to_string(),
            ));
        }

        Ok(Self {
            rooms: RoomClient::with_api_key(&config.url, &config.api_key, &config.api_secret),
            sip: SIPClient::with_api_key(&config.url, &config.api_key, &config.api_secret),
        })
    }
}

#[async_trait]
impl RoomGateway for LiveKitGateway {
    async fn create_room(
        &self,
        name: &str,
        metadata: &str,
        timeouts: RoomTimeouts,
    ) -> Result<RoomInfo, GatewayError> {
        let options = CreateRoomOptions {
            empty_timeout: u32::try_from(timeouts.empty_timeout.as_secs()).unwrap_or(u32::MAX),
            max_participants: timeouts.max_participants,
            metadata: metadata.to_string(),
            ..Default::default()
        };

        let room = self
            .rooms
            .create_room(name, options)
            .await
            .map_err(|e| GatewayError::Room(e.to_string()))?;

        info!(room_name = %room.name, room_sid = %room.sid, "Room created");
        Ok(RoomInfo {
            sid: room.sid,
            name: room.name,
        })
    }

    async fn create_sip_participant(&self, dial: &SipDial) -> Result<SipParticipant, GatewayError> {
        let options = CreateSIPParticipantOptions {
            participant_identity: dial.participant_identity.clone(),
            participant_name: dial.participant_name.clone(),
            participant_metadata: dial.participant_metadata.clone(),
            ringing_timeout: dial.ringing_timeout,
            max_call_duration: dial.max_call_duration,
            ..Default::default()
        };

        debug!(
            room_name = %dial.room_name,
            identity = %dial.participant_identity,
            "Creating SIP participant"
        );

        let info = self
            .sip
            .create_sip_participant(
                dial.trunk_id.clone(),
                dial.phone_number.clone(),
                dial.room_name.clone(),
                options,
                None,
            )
            .await
            .map_err(|e| GatewayError::Sip(e.to_string()))?;

        info!(
            room_name = %info.room_name,
            sip_call_id = %info.sip_call_id,
            "SIP participant created"
        );

        Ok(SipParticipant {
            participant_id: info.participant_id,
            participant_identity: info.participant_identity,
            room_name: info.room_name,
            sip_call_id: info.sip_call_id,
        })
    }
}
