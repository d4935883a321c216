//! Replica management through the scaling controller.

mod common;

use callhub_orchestrator::clock::Clock;
use callhub_orchestrator::scaling::{DeployRequest, ReplicaBounds, ScaleAction, ScalingRule};
use callhub_orchestrator::store::{Call, CallRecordStore, CallStatus, CallType};
use callhub_orchestrator::supervisor::InstanceStatus;
use common::Harness;
use rstest::rstest;

#[rstest]
#[case(1, 4)]
#[case(3, 1)]
#[case(2, 2)]
#[case(2, 0)]
#[tokio::test]
async fn test_scale_reaches_target(#[case] initial: u32, #[case] target: u32) {
    let h = Harness::new();
    let (project, agent) = h.seed_agent().await;
    let scaling = h.state.scaling();

    scaling
        .deploy(DeployRequest::new(agent.id, project.id, initial))
        .await
        .unwrap();
    let outcome = scaling.scale(&agent.id, i64::from(target)).await.unwrap();

    assert_eq!(outcome.previous_replicas, initial);
    assert_eq!(outcome.target_replicas, target);
    let expected = match target.cmp(&initial) {
        std::cmp::Ordering::Greater => ScaleAction::ScaleUp,
        std::cmp::Ordering::Less => ScaleAction::ScaleDown,
        std::cmp::Ordering::Equal => ScaleAction::NoChange,
    };
    assert_eq!(outcome.action, expected);

    let active = h.state.supervisor().active_instances(&agent.id).await.unwrap();
    assert_eq!(active.len(), target as usize);
}

#[tokio::test]
async fn test_scale_down_stops_oldest_first() {
    let h = Harness::new();
    let (project, agent) = h.seed_agent().await;
    let scaling = h.state.scaling();

    scaling
        .deploy(DeployRequest::new(agent.id, project.id, 1))
        .await
        .unwrap();
    h.clock.advance_secs(5);
    scaling.scale(&agent.id, 2).await.unwrap();
    h.clock.advance_secs(5);
    scaling.scale(&agent.id, 3).await.unwrap();

    let before = h.state.supervisor().active_instances(&agent.id).await.unwrap();
    let oldest = before[0].instance_id;
    let middle = before[1].instance_id;
    let newest = before[2].instance_id;

    scaling.scale(&agent.id, 1).await.unwrap();

    let after = h.state.supervisor().list_instances(Some(&agent.id)).await.unwrap();
    let status_of = |id| after.iter().find(|i| i.instance_id == id).map(|i| i.status);
    assert_ne!(status_of(oldest), Some(InstanceStatus::Starting));
    assert_ne!(status_of(middle), Some(InstanceStatus::Starting));
    assert_eq!(status_of(newest), Some(InstanceStatus::Starting));
}

#[tokio::test]
async fn test_negative_target_is_rejected() {
    let h = Harness::new();
    let (project, agent) = h.seed_agent().await;
    h.state
        .scaling()
        .deploy(DeployRequest::new(agent.id, project.id, 2))
        .await
        .unwrap();

    let err = h.state.scaling().scale(&agent.id, -1).await.unwrap_err();
    assert_eq!(err.code(), "invalid_argument");
    assert_eq!(
        h.state.supervisor().active_instances(&agent.id).await.unwrap().len(),
        2
    );
}

#[tokio::test]
async fn test_auto_scale_adds_replica_under_load() {
    let h = Harness::new();
    let (project, agent) = h.seed_agent().await;
    let scaling = h.state.scaling();

    scaling
        .deploy(DeployRequest::new(agent.id, project.id, 1))
        .await
        .unwrap();
    scaling
        .set_rule(ScalingRule::new(agent.id, 1.5, 0.2))
        .await
        .unwrap();

    for _ in 0..2 {
        let mut call = Call::new(project.id, CallType::Inbound, "+15550100", h.clock.now())
            .with_agent(agent.id);
        call.status = CallStatus::Answered;
        h.store.save_call(&call).await.unwrap();
    }

    // Still warming up: nothing to measure yet.
    let bounds = ReplicaBounds::new(1, 3).unwrap();
    assert!(scaling.auto_scale_once(&agent.id, bounds).await.unwrap().is_none());

    h.clock.advance_secs(31);
    let outcome = scaling
        .auto_scale_once(&agent.id, bounds)
        .await
        .unwrap()
        .expect("load of 2.0 is above the threshold");
    assert_eq!(outcome.action, ScaleAction::ScaleUp);
    assert_eq!(outcome.target_replicas, 2);

    // Inside the cooldown window the same load changes nothing.
    assert!(scaling.auto_scale_once(&agent.id, bounds).await.unwrap().is_none());
}

#[tokio::test]
async fn test_auto_scale_down_from_above_max_is_one_step() {
    let h = Harness::new();
    let (project, agent) = h.seed_agent().await;
    let scaling = h.state.scaling();

    scaling
        .deploy(DeployRequest::new(agent.id, project.id, 1))
        .await
        .unwrap();
    scaling.scale(&agent.id, 4).await.unwrap();
    scaling
        .set_rule(ScalingRule::new(agent.id, 1.5, 0.2))
        .await
        .unwrap();
    h.clock.advance_secs(31);

    // No calls at all, and four replicas against a maximum of two.
    let outcome = scaling
        .auto_scale_once(&agent.id, ReplicaBounds::new(1, 2).unwrap())
        .await
        .unwrap()
        .expect("idle agent above its maximum scales down");
    assert_eq!(outcome.action, ScaleAction::ScaleDown);
    assert_eq!(outcome.previous_replicas, 4);
    assert_eq!(outcome.target_replicas, 3);
}

#[tokio::test]
async fn test_system_health_counts_running_instances() {
    let h = Harness::new();
    let (project, agent) = h.seed_agent().await;
    h.state
        .scaling()
        .deploy(DeployRequest::new(agent.id, project.id, 2))
        .await
        .unwrap();
    h.clock.advance_secs(31);

    let health = h.state.scaling().system_health().await.unwrap();
    assert_eq!(health.total_instances, 2);
    assert_eq!(health.running_instances, 2);
    assert_eq!(health.active_calls, 0);
    assert_eq!(health.system_load, 0.0);
}
