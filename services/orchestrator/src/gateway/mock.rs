//! In-process gateway for tests and development.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::info;

use super::{GatewayError, RoomGateway, RoomInfo, RoomTimeouts, SipDial, SipParticipant};

/// A request observed by the mock gateway.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayCall {
    CreateRoom {
        name: String,
        metadata: String,
        timeouts: RoomTimeouts,
    },
    Dial {
        room_name: String,
        phone_number: String,
        participant_identity: String,
    },
}

/// Gateway that records requests and can be told to fail.
#[derive(Debug, Default)]
pub struct MockGateway {
    counter: AtomicU64,
    fail_rooms: AtomicBool,
    fail_dials: AtomicBool,
    calls: Mutex<Vec<GatewayCall>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent room creation fail.
    pub fn fail_rooms(&self, fail: bool) {
        self.fail_rooms.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent SIP dial fail.
    pub fn fail_dials(&self, fail: bool) {
        self.fail_dials.store(fail, Ordering::SeqCst);
    }

    /// Requests seen so far, in order.
    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    fn record(&self, call: GatewayCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    fn next_id(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl RoomGateway for MockGateway {
    async fn create_room(
        &self,
        name: &str,
        metadata: &str,
        timeouts: RoomTimeouts,
    ) -> Result<RoomInfo, GatewayError> {
        self.record(GatewayCall::CreateRoom {
            name: name.to_string(),
            metadata: metadata.to_string(),
            timeouts,
        });

        if self.fail_rooms.load(Ordering::SeqCst) {
            return Err(GatewayError::Room("mock gateway configured to fail".to_string()));
        }

        info!(room_name = %name, "[MOCK] Room created");
        Ok(RoomInfo {
            sid: format!("RM_{:08x}", self.next_id()),
            name: name.to_string(),
        })
    }

    async fn create_sip_participant(&self, dial: &SipDial) -> Result<SipParticipant, GatewayError> {
        self.record(GatewayCall::Dial {
            room_name: dial.room_name.clone(),
            phone_number: dial.phone_number.clone(),
            participant_identity: dial.participant_identity.clone(),
        });

        if self.fail_dials.load(Ordering::SeqCst) {
            return Err(GatewayError::Sip("mock trunk rejected the call".to_string()));
        }

        let n = self.next_id();
        info!(room_name = %dial.room_name, "[MOCK] SIP participant created");
        Ok(SipParticipant {
            participant_id: format!("PA_{n:08x}"),
            participant_identity: dial.participant_identity.clone(),
            room_name: dial.room_name.clone(),
            sip_call_id: format!("SCL_{n:08x}"),
        })
    }
}
