//! Instance supervisor: deploys, health-checks and stops workers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use callhub_id::{AgentId, InstanceId, ProjectId};
use tracing::{debug, info, instrument, warn};

use super::{
    AgentInstance, DeploymentType, InstanceRegistry, InstanceSlot, InstanceStatus,
    WorkerLauncher, WorkerSpec,
};
use crate::clock::Clock;
use crate::error::{OrchestratorError, Result};
use crate::store::CallRecordStore;

/// Supervisor timing.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// A starting instance older than this is promoted to running.
    pub warmup_period: Duration,

    /// A live instance whose heartbeat is older than this is marked error.
    pub heartbeat_timeout: Duration,

    /// How long a worker gets to exit after SIGTERM.
    pub graceful_stop_timeout: Duration,

    /// Liveness polling while waiting for a graceful exit.
    pub stop_poll_interval: Duration,

    /// How long a stopped instance stays visible before eviction.
    pub eviction_delay: Duration,

    /// Per-agent health monitor period.
    pub monitor_interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            warmup_period: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(300),
            graceful_stop_timeout: Duration::from_secs(5),
            stop_poll_interval: Duration::from_millis(250),
            eviction_delay: Duration::from_secs(10),
            monitor_interval: Duration::from_secs(30),
        }
    }
}

/// Owns worker lifecycles for every agent.
#[derive(Clone)]
pub struct InstanceSupervisor {
    registry: Arc<InstanceRegistry>,
    launcher: Arc<dyn WorkerLauncher>,
    store: Arc<dyn CallRecordStore>,
    clock: Arc<dyn Clock>,
    config: Arc<SupervisorConfig>,
}

impl InstanceSupervisor {
    pub fn new(
        registry: Arc<InstanceRegistry>,
        launcher: Arc<dyn WorkerLauncher>,
        store: Arc<dyn CallRecordStore>,
        clock: Arc<dyn Clock>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            registry,
            launcher,
            store,
            clock,
            config: Arc::new(config),
        }
    }

    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Launch one worker for an active agent of `project_id`.
    ///
    /// Nothing is registered when the worker fails to spawn.
    #[instrument(skip_all, fields(agent_id = %agent_id))]
    pub async fn deploy(
        &self,
        agent_id: AgentId,
        project_id: ProjectId,
        deployment_type: DeploymentType,
        env: HashMap<String, String>,
    ) -> Result<InstanceId> {
        self.store
            .get_agent(&agent_id)
            .await?
            .filter(|agent| agent.is_active && agent.project_id == project_id)
            .ok_or_else(|| OrchestratorError::not_found("agent", agent_id))?;

        self.store
            .get_project(&project_id)
            .await?
            .filter(|project| project.is_active)
            .ok_or_else(|| OrchestratorError::not_found("project", project_id))?;

        let spec = WorkerSpec {
            instance_id: InstanceId::new(),
            agent_id,
            project_id,
            deployment_type,
            env,
        };

        let process = self.launcher.start(&spec).await?;

        let now = self.clock.now();
        let instance = AgentInstance {
            instance_id: spec.instance_id,
            agent_id,
            project_id,
            deployment_type,
            status: InstanceStatus::Starting,
            pid: process.pid(),
            started_at: now,
            last_heartbeat: now,
        };
        self.registry.insert(instance, Some(process)).await;

        info!(
            instance_id = %spec.instance_id,
            deployment_type = deployment_type.as_str(),
            "Agent instance deployed"
        );
        Ok(spec.instance_id)
    }

    async fn slot(&self, id: &InstanceId) -> Result<Arc<InstanceSlot>> {
        self.registry
            .get(id)
            .await
            .ok_or_else(|| OrchestratorError::not_found("instance", id))
    }

    /// Refresh one instance from its process and return the new record.
    pub async fn poll_health(&self, id: &InstanceId) -> Result<AgentInstance> {
        let slot = self.slot(id).await?;
        self.poll_slot(&slot).await
    }

    async fn poll_slot(&self, slot: &InstanceSlot) -> Result<AgentInstance> {
        let mut record = slot.lock().await;

        // Terminal records are final; stopping ones belong to `stop`.
        if record.status.is_terminal() || record.status == InstanceStatus::Stopping {
            return Ok(record.clone());
        }

        let Some(process) = slot.process() else {
            warn!(instance_id = %record.instance_id, "Instance has no worker process");
            record.transition(InstanceStatus::Error)?;
            return Ok(record.clone());
        };

        if !process.is_alive() {
            info!(instance_id = %record.instance_id, pid = ?record.pid, "Worker process is gone");
            record.transition(InstanceStatus::Stopped)?;
            self.schedule_eviction(record.instance_id);
            return Ok(record.clone());
        }

        let now = self.clock.now();
        let since_heartbeat = (now - record.last_heartbeat).to_std().unwrap_or_default();
        if since_heartbeat > self.config.heartbeat_timeout {
            // The process is left running; replacement is a scaling decision.
            warn!(
                instance_id = %record.instance_id,
                seconds_since_heartbeat = since_heartbeat.as_secs(),
                "Stale instance heartbeat"
            );
            record.transition(InstanceStatus::Error)?;
            return Ok(record.clone());
        }

        record.last_heartbeat = now;
        if record.status == InstanceStatus::Starting {
            let uptime = (now - record.started_at).to_std().unwrap_or_default();
            if uptime > self.config.warmup_period {
                record.transition(InstanceStatus::Running)?;
                info!(instance_id = %record.instance_id, "Agent instance running");
            }
        }
        Ok(record.clone())
    }

    /// Health-refreshed snapshot of the instances, oldest first.
    pub async fn list_instances(&self, agent_id: Option<&AgentId>) -> Result<Vec<AgentInstance>> {
        let mut instances = Vec::new();
        for slot in self.registry.slots(agent_id).await {
            instances.push(self.poll_slot(&slot).await?);
        }
        Ok(instances)
    }

    /// Starting or running instances of an agent, oldest first.
    pub async fn active_instances(&self, agent_id: &AgentId) -> Result<Vec<AgentInstance>> {
        Ok(self
            .list_instances(Some(agent_id))
            .await?
            .into_iter()
            .filter(|instance| instance.status.is_active())
            .collect())
    }

    /// Claim an instance for stopping.
    ///
    /// A live instance moves to `stopping`. An `error` instance keeps its
    /// status; its worker may still be running and is terminated anyway.
    /// Stopping, stopped and already reaped instances are a conflict.
    async fn begin_stop(&self, id: &InstanceId) -> Result<(Arc<InstanceSlot>, AgentInstance)> {
        let slot = self.slot(id).await?;
        let snapshot = {
            let mut record = slot.lock().await;
            match record.status {
                InstanceStatus::Stopping => {
                    return Err(OrchestratorError::Conflict(format!(
                        "instance {id} is already stopping"
                    )));
                }
                InstanceStatus::Error => {
                    if !slot.claim_reap() {
                        return Err(OrchestratorError::Conflict(format!(
                            "instance {id} is already being reaped"
                        )));
                    }
                }
                _ => record.transition(InstanceStatus::Stopping)?,
            }
            record.clone()
        };
        info!(instance_id = %id, status = %snapshot.status, "Stopping agent instance");
        Ok((slot, snapshot))
    }

    async fn finish_stop(&self, slot: Arc<InstanceSlot>) -> Result<AgentInstance> {
        let id = slot.instance_id();

        if let Some(process) = slot.process() {
            if let Err(e) = process.signal_graceful() {
                warn!(instance_id = %id, error = %e, "Graceful stop signal failed");
            }

            let deadline = tokio::time::Instant::now() + self.config.graceful_stop_timeout;
            while process.is_alive() && tokio::time::Instant::now() < deadline {
                tokio::time::sleep(self.config.stop_poll_interval).await;
            }

            if process.is_alive() {
                warn!(instance_id = %id, "Worker ignored SIGTERM, killing");
                if let Err(e) = process.signal_force() {
                    warn!(instance_id = %id, error = %e, "Force stop signal failed");
                }
            }
        }

        let snapshot = {
            let mut record = slot.lock().await;
            if record.status == InstanceStatus::Stopping {
                record.transition(InstanceStatus::Stopped)?;
            }
            record.clone()
        };
        info!(instance_id = %id, status = %snapshot.status, "Agent instance stopped");

        self.schedule_eviction(id);
        Ok(snapshot)
    }

    fn schedule_eviction(&self, id: InstanceId) {
        let registry = self.registry.clone();
        let delay = self.config.eviction_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if registry.remove(&id).await {
                debug!(instance_id = %id, "Instance evicted");
            }
        });
    }

    /// Stop an instance and wait for its process to exit.
    pub async fn stop(&self, id: &InstanceId) -> Result<AgentInstance> {
        let (slot, _) = self.begin_stop(id).await?;
        self.finish_stop(slot).await
    }

    /// Mark an instance stopping and finish the shutdown in the background.
    ///
    /// Returns the `stopping` record.
    pub async fn stop_in_background(&self, id: &InstanceId) -> Result<AgentInstance> {
        let (slot, snapshot) = self.begin_stop(id).await?;
        let supervisor = self.clone();
        tokio::spawn(async move {
            let id = slot.instance_id();
            if let Err(e) = supervisor.finish_stop(slot).await {
                warn!(instance_id = %id, error = %e, "Background stop failed");
            }
        });
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::{Agent, MemoryStore, Project};
    use crate::supervisor::FakeWorkerLauncher;

    struct Fixture {
        supervisor: InstanceSupervisor,
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
            store,
            Arc::new(clock.clone()),
            SupervisorConfig::default(),
        );
        Fixture {
            supervisor,
            launcher,
            clock,
            agent,
        }
    }

    async fn deploy(f: &Fixture) -> InstanceId {
        f.supervisor
            .deploy(
                f.agent.id,
                f.agent.project_id,
                DeploymentType::Worker,
                HashMap::new(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_deploy_registers_starting_instance() {
        let f = fixture().await;
        let id = deploy(&f).await;

        let instance = f.supervisor.poll_health(&id).await.unwrap();
        assert_eq!(instance.status, InstanceStatus::Starting);
        assert_eq!(instance.pid, Some(f.launcher.processes()[0].pid_value()));
    }

    #[tokio::test]
    async fn test_spawn_failure_registers_nothing() {
        let f = fixture().await;
        f.launcher.fail_starts(true);

        let err = f
            .supervisor
            .deploy(
                f.agent.id,
                f.agent.project_id,
                DeploymentType::Worker,
                HashMap::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, OrchestratorError::Deployment(_)));
        assert!(f.supervisor.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_dead_process_is_stopped() {
        let f = fixture().await;
        let id = deploy(&f).await;
        f.launcher.processes()[0].kill();

        let instance = f.supervisor.poll_health(&id).await.unwrap();
        assert_eq!(instance.status, InstanceStatus::Stopped);
    }

    #[tokio::test]
    async fn test_warmup_boundary() {
        let f = fixture().await;
        let id = deploy(&f).await;

        f.clock.advance_secs(30);
        let instance = f.supervisor.poll_health(&id).await.unwrap();
        assert_eq!(instance.status, InstanceStatus::Starting);

        f.clock.advance_secs(1);
        let instance = f.supervisor.poll_health(&id).await.unwrap();
        assert_eq!(instance.status, InstanceStatus::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_escalates_to_sigkill() {
        let f = fixture().await;
        f.launcher.ignore_sigterm(true);
        let id = deploy(&f).await;

        let instance = f.supervisor.stop(&id).await.unwrap();

        assert_eq!(instance.status, InstanceStatus::Stopped);
        let process = &f.launcher.processes()[0];
        assert_eq!(process.graceful_signals(), 1);
        assert_eq!(process.force_signals(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_instance_is_evicted_after_grace() {
        let f = fixture().await;
        let id = deploy(&f).await;

        f.supervisor.stop(&id).await.unwrap();
        assert_eq!(
            f.supervisor.poll_health(&id).await.unwrap().status,
            InstanceStatus::Stopped
        );

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(f.supervisor.poll_health(&id).await.unwrap_err().is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_stop_is_conflict() {
        let f = fixture().await;
        let id = deploy(&f).await;

        f.supervisor.stop_in_background(&id).await.unwrap();
        let err = f.supervisor.stop(&id).await.unwrap_err();
        assert!(err.is_conflict());
    }
}
