//! Store-backed call operations.

use std::sync::Arc;
use std::time::Duration;

use callhub_id::{AgentId, CallId, CampaignId, ContactId, ProjectId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use super::machine::{self, TransferKind, TransitionError};
use crate::clock::Clock;
use crate::error::{OrchestratorError, Result};
use crate::gateway::{
    customer_identity, room_name_for_call, GatewayError, RoomGateway, RoomTimeouts, SipDial,
};
use crate::locks::KeyedLocks;
use crate::store::{Call, CallFilter, CallRecordStore, CallStatus, CallType, Contact};

/// Call handling settings.
#[derive(Debug, Clone)]
pub struct CallConfig {
    /// SIP trunk used for outbound dials.
    pub sip_trunk_id: String,

    /// How often the no-answer watchdog re-reads the call.
    pub watchdog_poll_interval: Duration,

    /// How long a call may ring before it is marked unanswered.
    pub no_answer_timeout: Duration,

    /// Default ringing timeout handed to the SIP trunk.
    pub ringing_timeout: Duration,

    /// Default hard limit on call length.
    pub max_call_duration: Duration,

    pub room_timeouts: RoomTimeouts,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            sip_trunk_id: String::new(),
            watchdog_poll_interval: Duration::from_secs(5),
            no_answer_timeout: Duration::from_secs(60),
            ringing_timeout: Duration::from_secs(30),
            max_call_duration: Duration::from_secs(3600),
            room_timeouts: RoomTimeouts::default(),
        }
    }
}

/// Request to dial a phone number for an agent.
#[derive(Debug, Clone, Deserialize)]
pub struct OutboundCallRequest {
    pub project_id: ProjectId,
    pub agent_id: AgentId,
    pub phone_number: String,
    #[serde(default)]
    pub contact_id: Option<ContactId>,
    #[serde(default)]
    pub campaign_id: Option<CampaignId>,
    #[serde(default)]
    pub ringing_timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_duration_secs: Option<u64>,
}

/// Result of a successful outbound dial.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundCall {
    pub call_id: CallId,
    pub room_name: String,
    pub sip_call_id: String,
    pub participant_identity: String,
    pub status: CallStatus,
}

/// Applies call transitions against the record store.
///
/// Operations on the same call id are serialized; a transition is always
/// read-modify-write on the latest stored document.
#[derive(Clone)]
pub struct CallService {
    store: Arc<dyn CallRecordStore>,
    gateway: Arc<dyn RoomGateway>,
    clock: Arc<dyn Clock>,
    config: Arc<CallConfig>,
    locks: Arc<KeyedLocks<CallId>>,
    shutdown: watch::Receiver<bool>,
    // Keeps the default shutdown channel open until a real one is attached.
    _shutdown_tx: Arc<watch::Sender<bool>>,
}

impl CallService {
    pub fn new(
        store: Arc<dyn CallRecordStore>,
        gateway: Arc<dyn RoomGateway>,
        clock: Arc<dyn Clock>,
        config: CallConfig,
    ) -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            store,
            gateway,
            clock,
            config: Arc::new(config),
            locks: Arc::new(KeyedLocks::new()),
            shutdown: rx,
            _shutdown_tx: Arc::new(tx),
        }
    }

    /// Stop background watchdogs when `shutdown` flips to true.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn store(&self) -> &Arc<dyn CallRecordStore> {
        &self.store
    }

    pub fn config(&self) -> &CallConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn get(&self, call_id: &CallId) -> Result<Call> {
        self.store
            .get_call(call_id)
            .await?
            .ok_or_else(|| OrchestratorError::not_found("call", call_id))
    }

    /// Load, transition and save one call under its lock.
    async fn apply<F>(&self, call_id: &CallId, transition: F) -> Result<Call>
    where
        F: FnOnce(&mut Call, DateTime<Utc>) -> std::result::Result<(), TransitionError> + Send,
    {
        let _guard = self.locks.lock(call_id).await;

        let mut call = self.get(call_id).await?;
        let from = call.status;
        transition(&mut call, self.clock.now())?;
        self.store.save_call(&call).await?;

        debug!(call_id = %call_id, from = %from, to = %call.status, "Call transitioned");
        Ok(call)
    }

    pub async fn start(
        &self,
        call_id: &CallId,
        room_name: &str,
        participant_id: Option<&str>,
    ) -> Result<Call> {
        self.apply(call_id, |call, now| {
            machine::start(call, room_name, participant_id, now)
        })
        .await
    }

    pub async fn assign_agent(&self, call_id: &CallId, room_name: &str) -> Result<Call> {
        self.apply(call_id, |call, now| {
            machine::assign_agent(call, room_name, now)
        })
        .await
    }

    pub async fn answer(&self, call_id: &CallId) -> Result<Call> {
        self.apply(call_id, machine::answer).await
    }

    pub async fn end(&self, call_id: &CallId, outcome: Option<&str>) -> Result<Call> {
        self.apply(call_id, |call, now| machine::end(call, outcome, now))
            .await
    }

    pub async fn fail(&self, call_id: &CallId, reason: Option<&str>) -> Result<Call> {
        self.apply(call_id, |call, now| machine::fail(call, reason, now))
            .await
    }

    pub async fn mark_no_answer(&self, call_id: &CallId) -> Result<Call> {
        self.apply(call_id, machine::mark_no_answer).await
    }

    pub async fn transfer(
        &self,
        call_id: &CallId,
        destination: &str,
        kind: TransferKind,
    ) -> Result<Call> {
        self.apply(call_id, |call, now| {
            machine::transfer(call, destination, kind, now)
        })
        .await
    }

    /// Complete every answered call bound to `room_name`.
    ///
    /// Returns how many calls were completed. Calls that reached a terminal
    /// status concurrently are skipped.
    pub async fn cleanup_room(&self, room_name: &str) -> Result<usize> {
        let answered = self
            .store
            .find_calls(&CallFilter::in_room(room_name).with_statuses([CallStatus::Answered]))
            .await?;

        let mut completed = 0;
        for call in answered {
            match self.end(&call.id, None).await {
                Ok(call) => {
                    info!(
                        call_id = %call.id,
                        room_name,
                        duration_seconds = ?call.duration_seconds,
                        "Call completed on room cleanup"
                    );
                    completed += 1;
                }
                Err(e) if e.is_conflict() => {
                    debug!(call_id = %call.id, error = %e, "Call already closed");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(completed)
    }

    /// Create a call, its room and the SIP leg, then start the no-answer
    /// watchdog.
    ///
    /// A gateway failure leaves the call stored as `failed` with the error
    /// in its outcome.
    #[instrument(skip_all, fields(agent_id = %request.agent_id))]
    pub async fn initiate_outbound(&self, request: OutboundCallRequest) -> Result<OutboundCall> {
        let project = self
            .store
            .get_project(&request.project_id)
            .await?
            .filter(|p| p.is_active)
            .ok_or_else(|| OrchestratorError::not_found("project", request.project_id))?;

        let agent = self
            .store
            .get_agent(&request.agent_id)
            .await?
            .filter(|a| a.is_active)
            .ok_or_else(|| OrchestratorError::not_found("agent", request.agent_id))?;

        let contact = match &request.contact_id {
            Some(contact_id) => Some(
                self.store
                    .get_contact(contact_id)
                    .await?
                    .ok_or_else(|| OrchestratorError::not_found("contact", contact_id))?,
            ),
            None => None,
        };

        let mut call = Call::new(
            project.id,
            CallType::Outbound,
            request.phone_number.clone(),
            self.clock.now(),
        )
        .with_agent(agent.id);
        call.campaign_id = request.campaign_id;
        call.contact_id = request.contact_id;
        self.store.save_call(&call).await?;

        let room_name = room_name_for_call(&call.id);
        let identity = customer_identity(&call.id);
        info!(call_id = %call.id, room_name = %room_name, "Initiating outbound call");

        let mut metadata = serde_json::json!({
            "call_id": call.id,
            "agent_id": agent.id,
            "project_id": project.id,
            "phone_number": request.phone_number,
            "call_type": "outbound",
            "agent_config": {
                "name": agent.name,
                "prompt": agent.prompt,
                "voice_settings": agent.voice_settings,
            },
        });
        if let Some(contact) = &contact {
            metadata["contact_info"] = contact_info(contact);
        }

        if let Err(e) = self
            .gateway
            .create_room(&room_name, &metadata.to_string(), self.config.room_timeouts)
            .await
        {
            return Err(self.record_gateway_failure(&call.id, e).await);
        }

        if self.config.sip_trunk_id.is_empty() {
            let e = GatewayError::NotConfigured("SIP_TRUNK_ID is not set".to_string());
            return Err(self.record_gateway_failure(&call.id, e).await);
        }

        let dial = SipDial {
            trunk_id: self.config.sip_trunk_id.clone(),
            phone_number: request.phone_number.clone(),
            room_name: room_name.clone(),
            participant_identity: identity,
            participant_name: Some(
                contact
                    .as_ref()
                    .map(|c| c.name.clone())
                    .unwrap_or_else(|| format!("Caller {}", request.phone_number)),
            ),
            participant_metadata: Some(
                serde_json::json!({
                    "call_id": call.id,
                    "phone_number": request.phone_number,
                    "type": "sip_participant",
                })
                .to_string(),
            ),
            ringing_timeout: Some(
                request
                    .ringing_timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(self.config.ringing_timeout),
            ),
            max_call_duration: Some(
                request
                    .max_duration_secs
                    .map(Duration::from_secs)
                    .unwrap_or(self.config.max_call_duration),
            ),
        };

        let participant = match self.gateway.create_sip_participant(&dial).await {
            Ok(participant) => participant,
            Err(e) => return Err(self.record_gateway_failure(&call.id, e).await),
        };

        let sip_call_id = participant.sip_call_id.clone();
        let call = self
            .apply(&call.id, |call, now| {
                machine::start(
                    call,
                    &room_name,
                    Some(&participant.participant_identity),
                    now,
                )?;
                call.sip_call_id = Some(sip_call_id);
                Ok(())
            })
            .await?;

        self.spawn_watchdog(call.id);

        Ok(OutboundCall {
            call_id: call.id,
            room_name,
            sip_call_id: participant.sip_call_id,
            participant_identity: participant.participant_identity,
            status: call.status,
        })
    }

    async fn record_gateway_failure(&self, call_id: &CallId, err: GatewayError) -> OrchestratorError {
        error!(call_id = %call_id, error = %err, "Outbound call setup failed");

        let outcome = format!("Initiation failed: {err}");
        if let Err(e) = self
            .apply(call_id, |call, now| {
                machine::fail_with_outcome(call, outcome, now)
            })
            .await
        {
            warn!(call_id = %call_id, error = %e, "Could not record call failure");
        }

        OrchestratorError::Gateway(err)
    }

    fn spawn_watchdog(&self, call_id: CallId) {
        let service = self.clone();
        tokio::spawn(async move {
            if let Err(e) = service.watch_for_answer(&call_id).await {
                error!(call_id = %call_id, error = %e, "No-answer watchdog failed");
            }
        });
    }

    /// Poll a ringing call until it is picked up or the no-answer timeout
    /// passes, then mark it unanswered.
    ///
    /// Returns the status the call was left in.
    #[instrument(skip_all, fields(call_id = %call_id))]
    pub async fn watch_for_answer(&self, call_id: &CallId) -> Result<CallStatus> {
        let mut shutdown = self.shutdown.clone();
        let poll = self.config.watchdog_poll_interval;
        let mut waited = Duration::ZERO;

        while waited < self.config.no_answer_timeout {
            let call = self.get(call_id).await?;
            if !matches!(call.status, CallStatus::Ringing | CallStatus::AgentAssigned) {
                return Ok(call.status);
            }
            if *shutdown.borrow() {
                return Ok(call.status);
            }

            tokio::select! {
                _ = tokio::time::sleep(poll) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("Watchdog stopping on shutdown");
                        return Ok(call.status);
                    }
                }
            }
            waited += poll;
        }

        match self.mark_no_answer(call_id).await {
            Ok(call) => {
                info!(
                    timeout_secs = self.config.no_answer_timeout.as_secs(),
                    "Call marked as no answer"
                );
                Ok(call.status)
            }
            Err(e) if e.is_conflict() => Ok(self.get(call_id).await?.status),
            Err(e) => Err(e),
        }
    }
}

fn contact_info(contact: &Contact) -> serde_json::Value {
    serde_json::json!({
        "id": contact.id,
        "name": contact.name,
        "email": contact.email,
        "notes": contact.notes,
        "tags": contact.tags,
    })
}
