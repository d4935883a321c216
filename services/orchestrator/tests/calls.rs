//! Call lifecycle, outbound dialing and webhook-driven transitions.

mod common;

use std::time::Duration;

use callhub_orchestrator::calls::{OutboundCallRequest, TransferKind, WebhookOutcome};
use callhub_orchestrator::clock::Clock;
use callhub_orchestrator::gateway::{
    customer_identity, GatewayCall, RoomEvent, RoomEventKind, WebhookParticipant, WebhookRoom,
};
use callhub_orchestrator::routing::JobRequest;
use callhub_orchestrator::store::{
    Agent, Call, CallFilter, CallRecordStore, CallStatus, CallType, Project,
};
use common::Harness;
use serde_json::json;

async fn inbound_call(h: &Harness, project: &Project) -> Call {
    let call = Call::new(project.id, CallType::Inbound, "+15550100", h.clock.now());
    h.store.save_call(&call).await.unwrap();
    call
}

fn outbound_request(project: &Project, agent: &Agent) -> OutboundCallRequest {
    OutboundCallRequest {
        project_id: project.id,
        agent_id: agent.id,
        phone_number: "+15550123".to_string(),
        contact_id: None,
        campaign_id: None,
        ringing_timeout_secs: None,
        max_duration_secs: None,
    }
}

fn room_event(kind: RoomEventKind, room: &str, identity: Option<String>) -> RoomEvent {
    RoomEvent {
        event: kind,
        room: WebhookRoom {
            name: room.to_string(),
            sid: None,
        },
        participant: identity.map(|identity| WebhookParticipant {
            identity,
            sid: None,
        }),
        track: None,
    }
}

#[tokio::test]
async fn test_answered_call_records_duration() {
    let h = Harness::new();
    let (project, _) = h.seed_agent().await;
    let call = inbound_call(&h, &project).await;
    let calls = h.state.calls();

    calls.start(&call.id, "call-room", None).await.unwrap();
    calls.answer(&call.id).await.unwrap();
    h.clock.advance_secs(42);
    let ended = calls.end(&call.id, Some("resolved")).await.unwrap();

    assert_eq!(ended.status, CallStatus::Completed);
    assert_eq!(ended.duration_seconds, Some(42));
    assert_eq!(ended.call_outcome.as_deref(), Some("resolved"));
    assert!(ended.answered_at <= ended.ended_at);

    // Replaying the end changes nothing.
    h.clock.advance_secs(10);
    let err = calls.end(&call.id, Some("again")).await.unwrap_err();
    assert!(err.is_conflict());
    let stored = calls.get(&call.id).await.unwrap();
    assert_eq!(stored.duration_seconds, Some(42));
    assert_eq!(stored.call_outcome.as_deref(), Some("resolved"));
}

#[tokio::test]
async fn test_unanswered_call_has_no_duration() {
    let h = Harness::new();
    let (project, _) = h.seed_agent().await;
    let call = inbound_call(&h, &project).await;

    h.state.calls().start(&call.id, "call-room", None).await.unwrap();
    h.clock.advance_secs(20);
    let failed = h.state.calls().fail(&call.id, Some("busy")).await.unwrap();

    assert_eq!(failed.status, CallStatus::Failed);
    assert_eq!(failed.duration_seconds, None);
    assert_eq!(failed.call_outcome.as_deref(), Some("Failed: busy"));
}

#[tokio::test]
async fn test_transfer_closes_the_call() {
    let h = Harness::new();
    let (project, _) = h.seed_agent().await;
    let call = inbound_call(&h, &project).await;
    let calls = h.state.calls();

    calls.start(&call.id, "call-room", None).await.unwrap();
    calls.answer(&call.id).await.unwrap();
    h.clock.advance_secs(15);
    let transferred = calls
        .transfer(&call.id, "+15559999", TransferKind::Blind)
        .await
        .unwrap();

    assert_eq!(transferred.status, CallStatus::Transferred);
    assert_eq!(transferred.duration_seconds, Some(15));
    assert!(calls.answer(&call.id).await.unwrap_err().is_conflict());
}

#[tokio::test]
async fn test_outbound_call_dials_through_gateway() {
    let h = Harness::new();
    let (project, agent) = h.seed_agent().await;

    let outbound = h
        .state
        .calls()
        .initiate_outbound(outbound_request(&project, &agent))
        .await
        .unwrap();

    assert_eq!(outbound.status, CallStatus::Ringing);
    assert!(outbound.room_name.starts_with("sip-call-"));
    assert_eq!(outbound.participant_identity, customer_identity(&outbound.call_id));

    let stored = h.state.calls().get(&outbound.call_id).await.unwrap();
    assert_eq!(stored.call_type, CallType::Outbound);
    assert_eq!(stored.agent_id, Some(agent.id));
    assert_eq!(stored.room_name.as_deref(), Some(outbound.room_name.as_str()));
    assert_eq!(stored.sip_call_id.as_deref(), Some(outbound.sip_call_id.as_str()));

    let requests = h.gateway.calls();
    assert!(matches!(&requests[0], GatewayCall::CreateRoom { name, .. } if *name == outbound.room_name));
    assert!(matches!(&requests[1], GatewayCall::Dial { phone_number, .. } if phone_number.as_str() == "+15550123"));
}

#[tokio::test]
async fn test_gateway_failure_leaves_failed_call() {
    let h = Harness::new();
    let (project, agent) = h.seed_agent().await;
    h.gateway.fail_dials(true);

    let err = h
        .state
        .calls()
        .initiate_outbound(outbound_request(&project, &agent))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "gateway_error");

    let calls = h.store.find_calls(&CallFilter::for_agent(agent.id)).await.unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].status, CallStatus::Failed);
    assert!(calls[0]
        .call_outcome
        .as_deref()
        .unwrap()
        .starts_with("Initiation failed:"));
}

#[tokio::test]
async fn test_outbound_for_inactive_agent_is_not_found() {
    let h = Harness::new();
    let (project, _) = h.seed_agent().await;
    let retired = h.seed_inactive_agent(&project).await;

    let err = h
        .state
        .calls()
        .initiate_outbound(outbound_request(&project, &retired))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(h.gateway.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_watchdog_marks_unanswered_call() {
    let h = Harness::new();
    let (project, agent) = h.seed_agent().await;

    let outbound = h
        .state
        .calls()
        .initiate_outbound(outbound_request(&project, &agent))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(
        h.state.calls().get(&outbound.call_id).await.unwrap().status,
        CallStatus::Ringing
    );

    tokio::time::sleep(Duration::from_secs(35)).await;
    let call = h.state.calls().get(&outbound.call_id).await.unwrap();
    assert_eq!(call.status, CallStatus::NoAnswer);
    assert_eq!(call.call_outcome.as_deref(), Some("No answer"));
}

#[tokio::test(start_paused = true)]
async fn test_watchdog_closes_routed_call_nobody_answers() {
    let h = Harness::new();
    let (project, agent) = h.seed_agent().await;

    let outbound = h
        .state
        .calls()
        .initiate_outbound(outbound_request(&project, &agent))
        .await
        .unwrap();
    let job = JobRequest {
        room_name: outbound.room_name.clone(),
        metadata: json!({ "agent_id": agent.id, "call_id": outbound.call_id }),
    };
    h.state.router().route_job(&job).await.unwrap();
    assert_eq!(
        h.state.calls().get(&outbound.call_id).await.unwrap().status,
        CallStatus::AgentAssigned
    );

    tokio::time::sleep(Duration::from_secs(600)).await;
    let call = h.state.calls().get(&outbound.call_id).await.unwrap();
    assert_eq!(call.status, CallStatus::NoAnswer);
    assert_eq!(call.duration_seconds, None);

    let active = h
        .store
        .count_calls(&CallFilter::for_agent(agent.id).with_statuses(CallStatus::ACTIVE))
        .await
        .unwrap();
    assert_eq!(active, 0);
}

#[tokio::test(start_paused = true)]
async fn test_watchdog_leaves_answered_call_alone() {
    let h = Harness::new();
    let (project, agent) = h.seed_agent().await;

    let outbound = h
        .state
        .calls()
        .initiate_outbound(outbound_request(&project, &agent))
        .await
        .unwrap();

    let joined = room_event(
        RoomEventKind::ParticipantJoined,
        &outbound.room_name,
        Some(outbound.participant_identity.clone()),
    );
    let outcome = h.state.calls().apply_room_event(&joined).await.unwrap();
    assert_eq!(
        outcome,
        WebhookOutcome::Applied {
            status: CallStatus::Answered
        }
    );

    tokio::time::sleep(Duration::from_secs(90)).await;
    assert_eq!(
        h.state.calls().get(&outbound.call_id).await.unwrap().status,
        CallStatus::Answered
    );
}

#[tokio::test]
async fn test_customer_leaving_ends_call() {
    let h = Harness::new();
    let (project, agent) = h.seed_agent().await;
    let outbound = h
        .state
        .calls()
        .initiate_outbound(outbound_request(&project, &agent))
        .await
        .unwrap();
    let identity = Some(outbound.participant_identity.clone());

    h.state
        .calls()
        .apply_room_event(&room_event(
            RoomEventKind::ParticipantJoined,
            &outbound.room_name,
            identity.clone(),
        ))
        .await
        .unwrap();
    h.clock.advance_secs(42);

    // Agent legs do not touch call state.
    let agent_left = room_event(
        RoomEventKind::ParticipantLeft,
        &outbound.room_name,
        Some("agent-worker".to_string()),
    );
    assert_eq!(
        h.state.calls().apply_room_event(&agent_left).await.unwrap(),
        WebhookOutcome::Ignored
    );

    let customer_left = room_event(RoomEventKind::ParticipantLeft, &outbound.room_name, identity);
    let outcome = h.state.calls().apply_room_event(&customer_left).await.unwrap();
    assert_eq!(
        outcome,
        WebhookOutcome::Applied {
            status: CallStatus::Completed
        }
    );
    let call = h.state.calls().get(&outbound.call_id).await.unwrap();
    assert_eq!(call.duration_seconds, Some(42));

    let finished = room_event(RoomEventKind::RoomFinished, &outbound.room_name, None);
    assert_eq!(
        h.state.calls().apply_room_event(&finished).await.unwrap(),
        WebhookOutcome::Ignored
    );
}
