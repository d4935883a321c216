//! Job routing and room lifecycle tracking.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, instrument, warn};

use super::{RouteStatus, RoutingEntry, RoutingMetadata, RoutingStats, RoutingTable};
use crate::calls::CallService;
use crate::error::{OrchestratorError, Result};
use crate::gateway::RoomEventKind;

/// A voice-session job offered for a room.
#[derive(Debug, Clone, Deserialize)]
pub struct JobRequest {
    pub room_name: String,
    /// Room metadata, either the raw string or a JSON object.
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "route", rename_all = "snake_case")]
pub enum RouteOutcome {
    /// The room is bound to the named agent.
    Routed { entry: RoutingEntry },
    /// No agent is named; the default agent takes the job.
    DefaultAgent { room_name: String },
}

/// Effect of a room event on the routing table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RoomActivity {
    /// Unknown room or an event that does not change participation.
    Ignored,
    Updated { participant_count: u32 },
    /// The room emptied; its answered calls were completed and the entry
    /// removed.
    CleanedUp { calls_completed: usize },
}

pub struct JobRouter {
    table: Arc<RoutingTable>,
    calls: CallService,
}

impl JobRouter {
    pub fn new(table: Arc<RoutingTable>, calls: CallService) -> Self {
        Self { table, calls }
    }

    pub fn table(&self) -> &Arc<RoutingTable> {
        &self.table
    }

    /// Bind a room to the agent named in its metadata.
    ///
    /// Nothing is recorded when the agent is missing or inactive, when the
    /// call cannot take the agent, or when the room is already routed.
    #[instrument(skip_all, fields(room_name = %job.room_name))]
    pub async fn route_job(&self, job: &JobRequest) -> Result<RouteOutcome> {
        let metadata = RoutingMetadata::from_value(&job.metadata)?;

        let Some(agent_id) = metadata.agent_id else {
            warn!("No agent in room metadata, handing the job to the default agent");
            return Ok(RouteOutcome::DefaultAgent {
                room_name: job.room_name.clone(),
            });
        };

        let agent = self
            .calls
            .store()
            .get_agent(&agent_id)
            .await?
            .filter(|agent| agent.is_active)
            // A room claiming another project does not get this agent.
            .filter(|agent| metadata.project_id.map_or(true, |p| p == agent.project_id))
            .ok_or_else(|| OrchestratorError::not_found("agent", agent_id))?;

        let _room = self.table.lock_room(&job.room_name).await;
        if self.table.contains(&job.room_name) {
            return Err(OrchestratorError::Conflict(format!(
                "room {} is already routed",
                job.room_name
            )));
        }

        if let Some(call_id) = &metadata.call_id {
            self.calls.assign_agent(call_id, &job.room_name).await?;
        }

        let entry = RoutingEntry {
            room_name: job.room_name.clone(),
            agent_id,
            project_id: agent.project_id,
            call_id: metadata.call_id,
            participant_count: 0,
            status: RouteStatus::Active,
            started_at: self.calls.now(),
        };
        self.table.insert(entry.clone());

        info!(agent_id = %agent_id, call_id = ?metadata.call_id, "Job routed");
        Ok(RouteOutcome::Routed { entry })
    }

    /// Track participation in a routed room.
    ///
    /// When a departure leaves at most one participant (the agent itself)
    /// the room is cleaned up exactly once: the entry is marked stopping,
    /// answered calls in the room are completed and the entry is removed.
    pub async fn handle_room_event(&self, room_name: &str, kind: &RoomEventKind) -> Result<RoomActivity> {
        let _room = self.table.lock_room(room_name).await;

        let updated = match kind {
            RoomEventKind::ParticipantJoined => self.table.update(room_name, |entry| {
                entry.participant_count += 1;
            }),
            RoomEventKind::ParticipantLeft => self.table.update(room_name, |entry| {
                entry.participant_count = entry.participant_count.saturating_sub(1);
            }),
            _ => return Ok(RoomActivity::Ignored),
        };
        let Some(entry) = updated else {
            return Ok(RoomActivity::Ignored);
        };

        info!(
            room_name,
            event = ?kind,
            participants = entry.participant_count,
            "Room participation changed"
        );

        if *kind == RoomEventKind::ParticipantLeft && entry.participant_count <= 1 {
            return self.cleanup(room_name).await;
        }
        Ok(RoomActivity::Updated {
            participant_count: entry.participant_count,
        })
    }

    // Caller holds the room lock.
    async fn cleanup(&self, room_name: &str) -> Result<RoomActivity> {
        self.table
            .update(room_name, |entry| entry.status = RouteStatus::Stopping);

        let calls_completed = match self.calls.cleanup_room(room_name).await {
            Ok(count) => count,
            Err(e) => {
                // The entry stays `stopping`; the next departure retries.
                error!(room_name, error = %e, "Room cleanup failed");
                return Err(e);
            }
        };

        self.table.remove(room_name);
        info!(room_name, calls_completed, "Room cleaned up");
        Ok(RoomActivity::CleanedUp { calls_completed })
    }

    pub fn stats(&self) -> RoutingStats {
        self.table.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calls::CallConfig;
    use crate::clock::{Clock, ManualClock};
    use crate::gateway::MockGateway;
    use crate::store::{Agent, Call, CallRecordStore, CallStatus, CallType, MemoryStore, Project};
    use serde_json::json;

    struct Fixture {
        router: JobRouter,
        store: Arc<MemoryStore>,
        clock: ManualClock,
        agent: Agent,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let project = Project::new("acme");
        let agent = Agent::new(project.id, "support", "be helpful");
        store.put_project(&project).await.unwrap();
        store.put_agent(&agent).await.unwrap();

        let clock = ManualClock::default();
        let calls = CallService::new(
            store.clone(),
            Arc::new(MockGateway::new()),
            Arc::new(clock.clone()),
            CallConfig::default(),
        );
        Fixture {
            router: JobRouter::new(Arc::new(RoutingTable::new()), calls),
            store,
            clock,
            agent,
        }
    }

    fn job(room: &str, metadata: Value) -> JobRequest {
        JobRequest {
            room_name: room.to_string(),
            metadata,
        }
    }

    #[tokio::test]
    async fn test_route_assigns_call() {
        let f = fixture().await;
        let call = Call::new(f.agent.project_id, CallType::Inbound, "+15550100", f.clock.now());
        f.store.save_call(&call).await.unwrap();

        let outcome = f
            .router
            .route_job(&job(
                "room-1",
                json!({"agent_id": f.agent.id, "call_id": call.id}),
            ))
            .await
            .unwrap();

        let RouteOutcome::Routed { entry } = outcome else {
            panic!("expected a routed job");
        };
        assert_eq!(entry.project_id, f.agent.project_id);
        let call = f.store.get_call(&call.id).await.unwrap().unwrap();
        assert_eq!(call.status, CallStatus::AgentAssigned);
        assert_eq!(call.room_name.as_deref(), Some("room-1"));
    }

    #[tokio::test]
    async fn test_no_agent_falls_back_to_default() {
        let f = fixture().await;
        let outcome = f.router.route_job(&job("room-1", Value::Null)).await.unwrap();
        assert!(matches!(outcome, RouteOutcome::DefaultAgent { .. }));
        assert!(f.router.table().is_empty());
    }

    #[tokio::test]
    async fn test_inactive_agent_creates_no_entry() {
        let f = fixture().await;
        let mut agent = f.agent.clone();
        agent.is_active = false;
        f.store.put_agent(&agent).await.unwrap();

        let err = f
            .router
            .route_job(&job("room-1", json!({"agent_id": agent.id})))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(f.router.table().is_empty());
    }

    #[tokio::test]
    async fn test_terminal_call_is_conflict() {
        let f = fixture().await;
        let mut call = Call::new(f.agent.project_id, CallType::Inbound, "+15550100", f.clock.now());
        call.status = CallStatus::Completed;
        f.store.save_call(&call).await.unwrap();

        let err = f
            .router
            .route_job(&job(
                "room-1",
                json!({"agent_id": f.agent.id, "call_id": call.id}),
            ))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert!(f.router.table().is_empty());
    }

    #[tokio::test]
    async fn test_room_routed_once() {
        let f = fixture().await;
        let request = job("room-1", json!({"agent_id": f.agent.id}));
        f.router.route_job(&request).await.unwrap();
        assert!(f.router.route_job(&request).await.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn test_concurrent_departures_clean_up_once() {
        let f = fixture().await;
        f.router
            .route_job(&job("room-1", json!({"agent_id": f.agent.id})))
            .await
            .unwrap();

        let mut call = Call::new(f.agent.project_id, CallType::Inbound, "+15550100", f.clock.now());
        call.status = CallStatus::Answered;
        call.room_name = Some("room-1".to_string());
        call.answered_at = Some(f.clock.now());
        f.store.save_call(&call).await.unwrap();

        // Agent and customer.
        for _ in 0..2 {
            f.router
                .handle_room_event("room-1", &RoomEventKind::ParticipantJoined)
                .await
                .unwrap();
        }
        f.clock.advance_secs(20);

        let router = Arc::new(f.router);
        let left = RoomEventKind::ParticipantLeft;
        let (a, b) = tokio::join!(
            router.handle_room_event("room-1", &left),
            router.handle_room_event("room-1", &left),
        );
        let outcomes = [a.unwrap(), b.unwrap()];

        let cleanups = outcomes
            .iter()
            .filter(|o| matches!(o, RoomActivity::CleanedUp { .. }))
            .count();
        assert_eq!(cleanups, 1);
        assert!(outcomes.contains(&RoomActivity::CleanedUp { calls_completed: 1 }));
        assert!(outcomes.contains(&RoomActivity::Ignored));

        let call = f.store.get_call(&call.id).await.unwrap().unwrap();
        assert_eq!(call.status, CallStatus::Completed);
        assert_eq!(call.duration_seconds, Some(20));

        // A late departure for the evicted room changes nothing.
        assert_eq!(
            router.handle_room_event("room-1", &left).await.unwrap(),
            RoomActivity::Ignored
        );
    }

    #[tokio::test]
    async fn test_unknown_room_ignored() {
        let f = fixture().await;
        let activity = f
            .router
            .handle_room_event("nowhere", &RoomEventKind::ParticipantJoined)
            .await
            .unwrap();
        assert_eq!(activity, RoomActivity::Ignored);
    }
}
