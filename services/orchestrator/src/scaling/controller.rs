//! Replica management on top of the instance supervisor.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use callhub_id::{AgentId, DeploymentId, ProjectId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::health::{self, SystemHealth};
use super::rule::{decide, MetricType, ReplicaBounds, ScalingDecision, ScalingRule};
use super::worker::AutoScaleWorker;
use crate::clock::Clock;
use crate::error::{OrchestratorError, Result};
use crate::locks::KeyedLocks;
use crate::store::{CallFilter, CallRecordStore, CallStatus};
use crate::supervisor::{
    AgentInstance, AgentLoops, DeploymentType, InstanceStatus, InstanceSupervisor, LoopKind,
    MonitorWorker,
};

#[derive(Debug, Clone)]
pub struct ScalingConfig {
    /// Period of the per-agent auto-scale loop.
    pub auto_scale_interval: Duration,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            auto_scale_interval: Duration::from_secs(60),
        }
    }
}

fn default_replicas() -> u32 {
    1
}

fn default_min_replicas() -> u32 {
    1
}

fn default_max_replicas() -> u32 {
    5
}

/// Body of a deployment request.
#[derive(Debug, Clone, Deserialize)]
pub struct DeployRequest {
    pub agent_id: AgentId,
    pub project_id: ProjectId,
    #[serde(default)]
    pub deployment_type: DeploymentType,
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    #[serde(default)]
    pub auto_scale: bool,
    #[serde(default = "default_min_replicas")]
    pub min_replicas: u32,
    #[serde(default = "default_max_replicas")]
    pub max_replicas: u32,
    #[serde(default)]
    pub environment_vars: HashMap<String, String>,
}

impl DeployRequest {
    pub fn new(agent_id: AgentId, project_id: ProjectId, replicas: u32) -> Self {
        Self {
            agent_id,
            project_id,
            deployment_type: DeploymentType::Worker,
            replicas,
            auto_scale: false,
            min_replicas: default_min_replicas(),
            max_replicas: default_max_replicas(),
            environment_vars: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Deployment {
    pub deployment_id: DeploymentId,
    pub agent_id: AgentId,
    pub instances_deployed: usize,
    pub instances: Vec<AgentInstance>,
    pub auto_scale_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleAction {
    ScaleUp,
    ScaleDown,
    NoChange,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScaleOutcome {
    pub agent_id: AgentId,
    pub previous_replicas: u32,
    pub target_replicas: u32,
    pub action: ScaleAction,
}

/// How new replicas of an agent are launched.
#[derive(Debug, Clone, Default)]
struct DeploymentProfile {
    deployment_type: DeploymentType,
    env: HashMap<String, String>,
}

/// Scales agents up and down and runs their background loops.
#[derive(Clone)]
pub struct ScalingController {
    inner: Arc<Inner>,
}

struct Inner {
    supervisor: InstanceSupervisor,
    store: Arc<dyn CallRecordStore>,
    clock: Arc<dyn Clock>,
    loops: Arc<AgentLoops>,
    config: ScalingConfig,
    rules: RwLock<HashMap<AgentId, ScalingRule>>,
    last_action: Mutex<HashMap<AgentId, DateTime<Utc>>>,
    profiles: Mutex<HashMap<AgentId, DeploymentProfile>>,
    // Serializes replica changes per agent.
    agent_locks: KeyedLocks<AgentId>,
}

impl ScalingController {
    pub fn new(
        supervisor: InstanceSupervisor,
        store: Arc<dyn CallRecordStore>,
        clock: Arc<dyn Clock>,
        loops: Arc<AgentLoops>,
        config: ScalingConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                supervisor,
                store,
                clock,
                loops,
                config,
                rules: RwLock::new(HashMap::new()),
                last_action: Mutex::new(HashMap::new()),
                profiles: Mutex::new(HashMap::new()),
                agent_locks: KeyedLocks::new(),
            }),
        }
    }

    pub fn supervisor(&self) -> &InstanceSupervisor {
        &self.inner.supervisor
    }

    pub fn loops(&self) -> &Arc<AgentLoops> {
        &self.inner.loops
    }

    pub fn config(&self) -> &ScalingConfig {
        &self.inner.config
    }

    fn profile(&self, agent_id: &AgentId) -> DeploymentProfile {
        self.inner
            .profiles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(agent_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Deploy `replicas` workers for an agent and start its loops.
    ///
    /// An agent that already has starting or running instances is only
    /// redeployed when the request enables auto-scaling.
    #[instrument(skip_all, fields(agent_id = %request.agent_id))]
    pub async fn deploy(&self, request: DeployRequest) -> Result<Deployment> {
        let bounds = ReplicaBounds::new(request.min_replicas, request.max_replicas)?;
        let agent_id = request.agent_id;

        let store = &self.inner.store;
        store
            .get_agent(&agent_id)
            .await?
            .filter(|agent| agent.is_active && agent.project_id == request.project_id)
            .ok_or_else(|| OrchestratorError::not_found("agent", agent_id))?;
        store
            .get_project(&request.project_id)
            .await?
            .filter(|project| project.is_active)
            .ok_or_else(|| OrchestratorError::not_found("project", request.project_id))?;

        let _guard = self.inner.agent_locks.lock(&agent_id).await;
        let supervisor = &self.inner.supervisor;

        let existing = supervisor.active_instances(&agent_id).await?;
        if !existing.is_empty() && !request.auto_scale {
            return Err(OrchestratorError::Conflict(format!(
                "agent {agent_id} already has {} active instances; scale it instead",
                existing.len()
            )));
        }

        self.inner
            .profiles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                agent_id,
                DeploymentProfile {
                    deployment_type: request.deployment_type,
                    env: request.environment_vars.clone(),
                },
            );

        let mut instances = Vec::with_capacity(request.replicas as usize);
        for _ in 0..request.replicas {
            let id = supervisor
                .deploy(
                    agent_id,
                    request.project_id,
                    request.deployment_type,
                    request.environment_vars.clone(),
                )
                .await?;
            instances.push(supervisor.poll_health(&id).await?);
        }

        self.start_monitor(agent_id);
        if request.auto_scale {
            self.start_auto_scale(agent_id, bounds);
        }

        info!(
            replicas = instances.len(),
            auto_scale = request.auto_scale,
            "Agent deployed"
        );
        Ok(Deployment {
            deployment_id: DeploymentId::new(),
            agent_id,
            instances_deployed: instances.len(),
            instances,
            auto_scale_enabled: request.auto_scale,
        })
    }

    fn start_monitor(&self, agent_id: AgentId) {
        let worker = MonitorWorker::new(self.inner.supervisor.clone(), agent_id);
        self.inner
            .loops
            .spawn(agent_id, LoopKind::Monitor, move |cancel| async move {
                worker.run(cancel).await
            });
    }

    fn start_auto_scale(&self, agent_id: AgentId, bounds: ReplicaBounds) {
        let worker = AutoScaleWorker::new(self.clone(), agent_id, bounds);
        self.inner
            .loops
            .spawn(agent_id, LoopKind::AutoScale, move |cancel| async move {
                worker.run(cancel).await
            });
    }

    /// Stop the monitor and auto-scale loops of an agent.
    pub async fn cancel_agent_loops(&self, agent_id: &AgentId) {
        for handle in self.inner.loops.cancel_agent(agent_id) {
            if let Err(e) = handle.await {
                warn!(agent_id = %agent_id, error = %e, "Agent loop ended abnormally");
            }
        }
    }

    /// Bring the agent to exactly `target` starting or running instances.
    ///
    /// Scale-down stops the oldest instances first. Stopped instances are
    /// marked `stopping` before this returns; their processes wind down in
    /// the background.
    #[instrument(skip_all, fields(agent_id = %agent_id, target_replicas = target))]
    pub async fn scale(&self, agent_id: &AgentId, target: i64) -> Result<ScaleOutcome> {
        let target = u32::try_from(target).map_err(|_| {
            OrchestratorError::InvalidArgument(format!(
                "target replicas must be a non-negative count, got {target}"
            ))
        })?;

        let _guard = self.inner.agent_locks.lock(agent_id).await;
        let supervisor = &self.inner.supervisor;

        let active = supervisor.active_instances(agent_id).await?;
        let previous = active.len() as u32;

        let action = if target > previous {
            let agent = self
                .inner
                .store
                .get_agent(agent_id)
                .await?
                .ok_or_else(|| OrchestratorError::not_found("agent", agent_id))?;
            let profile = self.profile(agent_id);

            for _ in previous..target {
                supervisor
                    .deploy(
                        *agent_id,
                        agent.project_id,
                        profile.deployment_type,
                        profile.env.clone(),
                    )
                    .await?;
            }
            ScaleAction::ScaleUp
        } else if target < previous {
            let excess = (previous - target) as usize;
            // `active` is sorted oldest first.
            for instance in active.iter().take(excess) {
                supervisor.stop_in_background(&instance.instance_id).await?;
            }
            ScaleAction::ScaleDown
        } else {
            ScaleAction::NoChange
        };

        info!(previous, target, action = ?action, "Agent scaled");
        Ok(ScaleOutcome {
            agent_id: *agent_id,
            previous_replicas: previous,
            target_replicas: target,
            action,
        })
    }

    /// Install the auto-scaling rule for an agent, replacing any previous one.
    pub async fn set_rule(&self, rule: ScalingRule) -> Result<ScalingRule> {
        rule.validate()?;
        self.inner
            .store
            .get_agent(&rule.agent_id)
            .await?
            .ok_or_else(|| OrchestratorError::not_found("agent", rule.agent_id))?;

        info!(
            agent_id = %rule.agent_id,
            metric = rule.metric_type.as_str(),
            threshold_up = rule.threshold_up,
            threshold_down = rule.threshold_down,
            "Scaling rule set"
        );
        self.inner
            .rules
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(rule.agent_id, rule.clone());
        Ok(rule)
    }

    pub fn rule(&self, agent_id: &AgentId) -> Option<ScalingRule> {
        self.inner
            .rules
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(agent_id)
            .cloned()
    }

    /// Active calls of the agent per running instance.
    pub async fn current_load(&self, agent_id: &AgentId) -> Result<f64> {
        let running = self.running_count(agent_id).await?;
        let active_calls = self
            .inner
            .store
            .count_calls(&CallFilter::for_agent(*agent_id).with_statuses(CallStatus::ACTIVE))
            .await?;
        Ok(health::load(active_calls, running))
    }

    async fn running_count(&self, agent_id: &AgentId) -> Result<usize> {
        Ok(self
            .inner
            .supervisor
            .list_instances(Some(agent_id))
            .await?
            .iter()
            .filter(|instance| instance.status == InstanceStatus::Running)
            .count())
    }

    /// Decide whether the agent needs more or fewer replicas right now.
    ///
    /// Returns `None` without a rule, for metrics other than the call
    /// queue, during the rule's cooldown and while every instance is still
    /// warming up.
    pub async fn evaluate(&self, agent_id: &AgentId, bounds: ReplicaBounds) -> Result<ScalingDecision> {
        Ok(self.evaluate_with_count(agent_id, bounds).await?.0)
    }

    /// The decision together with the replica count it was made for.
    async fn evaluate_with_count(
        &self,
        agent_id: &AgentId,
        bounds: ReplicaBounds,
    ) -> Result<(ScalingDecision, u32)> {
        let Some(rule) = self.rule(agent_id) else {
            return Ok((ScalingDecision::None, 0));
        };
        if rule.metric_type != MetricType::CallQueue {
            debug!(agent_id = %agent_id, metric = rule.metric_type.as_str(), "Metric not evaluated");
            return Ok((ScalingDecision::None, 0));
        }

        let last_action = self
            .inner
            .last_action
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(agent_id)
            .copied();
        if rule.in_cooldown(last_action, self.inner.clock.now()) {
            debug!(agent_id = %agent_id, "Scaling cooldown in effect");
            return Ok((ScalingDecision::None, 0));
        }

        let active = self.inner.supervisor.active_instances(agent_id).await?;
        let running = active
            .iter()
            .filter(|instance| instance.status == InstanceStatus::Running)
            .count();
        let current = active.len() as u32;
        if running == 0 && current > 0 {
            return Ok((ScalingDecision::None, current));
        }

        let load = self.current_load(agent_id).await?;
        Ok((decide(&rule, load, current, bounds), current))
    }

    /// Evaluate and apply one auto-scaling step.
    pub async fn auto_scale_once(
        &self,
        agent_id: &AgentId,
        bounds: ReplicaBounds,
    ) -> Result<Option<ScaleOutcome>> {
        let (decision, current) = self.evaluate_with_count(agent_id, bounds).await?;
        // One step from the count that was measured. An agent scaled by hand
        // past the bounds walks back a step at a time.
        let target = decision.target(current);
        if target == current {
            return Ok(None);
        }

        if let ScalingDecision::ScaleUp { reason, .. } | ScalingDecision::ScaleDown { reason, .. } =
            &decision
        {
            info!(agent_id = %agent_id, current, target, reason = %reason, "Auto-scaling agent");
        }

        let outcome = self.scale(agent_id, i64::from(target)).await?;
        self.inner
            .last_action
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(*agent_id, self.inner.clock.now());
        Ok(Some(outcome))
    }

    /// Instance and load summary across every agent.
    pub async fn system_health(&self) -> Result<SystemHealth> {
        let instances = self.inner.supervisor.list_instances(None).await?;
        let running = instances
            .iter()
            .filter(|instance| instance.status == InstanceStatus::Running)
            .count();
        let active_calls = self
            .inner
            .store
            .count_calls(&CallFilter::default().with_statuses(CallStatus::ACTIVE))
            .await?;

        Ok(SystemHealth::new(
            self.inner.clock.now(),
            instances.len(),
            running,
            active_calls,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::{Agent, Call, CallType, MemoryStore, Project};
    use crate::supervisor::{FakeWorkerLauncher, InstanceRegistry, SupervisorConfig};

    struct Fixture {
        controller: ScalingController,
        store: Arc<MemoryStore>,
        launcher: Arc<FakeWorkerLauncher>,
        clock: ManualClock,
        agent: Agent,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let project = Project::new("acme");
        let agent = Agent::new(project.id, "support", "be helpful");
        store.put_project(&project).await.unwrap();
        store.put_agent(&agent).await.unwrap();

        let launcher = Arc::new(FakeWorkerLauncher::new());
        let clock = ManualClock::default();
        let supervisor = InstanceSupervisor::new(
            Arc::new(InstanceRegistry::new()),
            launcher.clone(),
            store.clone(),
            Arc::new(clock.clone()),
            SupervisorConfig::default(),
        );
        let controller = ScalingController::new(
            supervisor,
            store.clone(),
            Arc::new(clock.clone()),
            Arc::new(AgentLoops::new()),
            ScalingConfig::default(),
        );
        Fixture {
            controller,
            store,
            launcher,
            clock,
            agent,
        }
    }

    async fn add_active_calls(f: &Fixture, count: usize) {
        for _ in 0..count {
            let mut call = Call::new(f.agent.project_id, CallType::Inbound, "+15550100", f.clock.now())
                .with_agent(f.agent.id);
            call.status = CallStatus::Answered;
            f.store.save_call(&call).await.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_scale_up_and_down() {
        let f = fixture().await;

        let up = f.controller.scale(&f.agent.id, 3).await.unwrap();
        assert_eq!(up.action, ScaleAction::ScaleUp);
        assert_eq!(up.previous_replicas, 0);
        assert_eq!(f.launcher.processes().len(), 3);

        let same = f.controller.scale(&f.agent.id, 3).await.unwrap();
        assert_eq!(same.action, ScaleAction::NoChange);

        let down = f.controller.scale(&f.agent.id, 1).await.unwrap();
        assert_eq!(down.action, ScaleAction::ScaleDown);
        let active = f.controller.supervisor().active_instances(&f.agent.id).await.unwrap();
        assert_eq!(active.len(), 1);
    }

    #[tokio::test]
    async fn test_negative_target_rejected() {
        let f = fixture().await;
        let err = f.controller.scale(&f.agent.id, -1).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_scale_up_unknown_agent() {
        let f = fixture().await;
        let err = f.controller.scale(&AgentId::new(), 2).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_deploy_conflicts_without_auto_scale() {
        let f = fixture().await;
        let request = DeployRequest::new(f.agent.id, f.agent.project_id, 1);
        f.controller.deploy(request.clone()).await.unwrap();

        let err = f.controller.deploy(request.clone()).await.unwrap_err();
        assert!(err.is_conflict());

        let mut auto = request;
        auto.auto_scale = true;
        let deployment = f.controller.deploy(auto).await.unwrap();
        assert!(deployment.auto_scale_enabled);
        assert!(f.controller.loops().is_running(&f.agent.id, LoopKind::AutoScale));

        f.controller.cancel_agent_loops(&f.agent.id).await;
        assert!(!f.controller.loops().is_running(&f.agent.id, LoopKind::Monitor));
    }

    #[tokio::test]
    async fn test_set_rule_requires_agent() {
        let f = fixture().await;
        let err = f
            .controller
            .set_rule(ScalingRule::new(AgentId::new(), 0.8, 0.2))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_suppresses_second_action() {
        let f = fixture().await;
        let bounds = ReplicaBounds::new(1, 5).unwrap();
        f.controller
            .set_rule(ScalingRule::new(f.agent.id, 0.8, 0.2))
            .await
            .unwrap();

        f.controller.scale(&f.agent.id, 1).await.unwrap();
        f.clock.advance_secs(31);
        add_active_calls(&f, 3).await;

        let first = f.controller.auto_scale_once(&f.agent.id, bounds).await.unwrap();
        assert_eq!(first.map(|o| o.target_replicas), Some(2));

        f.clock.advance_secs(60);
        let second = f.controller.auto_scale_once(&f.agent.id, bounds).await.unwrap();
        assert!(second.is_none());

        // The monitor would keep heartbeats fresh meanwhile.
        for _ in 0..4 {
            f.clock.advance_secs(60);
            f.controller.supervisor().list_instances(None).await.unwrap();
        }
        let third = f.controller.auto_scale_once(&f.agent.id, bounds).await.unwrap();
        assert_eq!(third.map(|o| o.target_replicas), Some(3));
    }

    #[tokio::test]
    async fn test_non_call_queue_metric_is_not_evaluated() {
        let f = fixture().await;
        let mut rule = ScalingRule::new(f.agent.id, 0.8, 0.2);
        rule.metric_type = MetricType::Cpu;
        f.controller.set_rule(rule).await.unwrap();

        let decision = f
            .controller
            .evaluate(&f.agent.id, ReplicaBounds::default())
            .await
            .unwrap();
        assert_eq!(decision, ScalingDecision::None);
    }

    #[tokio::test]
    async fn test_system_health_counts() {
        let f = fixture().await;
        f.controller.scale(&f.agent.id, 2).await.unwrap();
        f.clock.advance_secs(31);
        add_active_calls(&f, 1).await;

        let health = f.controller.system_health().await.unwrap();
        assert_eq!(health.total_instances, 2);
        assert_eq!(health.running_instances, 2);
        assert_eq!(health.active_calls, 1);
        assert_eq!(health.system_load, 0.5);
    }
}
