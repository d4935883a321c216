//! Per-agent health monitor.
//!
//! Periodically polls every instance of one agent so status changes (warm-up
//! promotion, dead processes, stale heartbeats) surface without waiting for
//! a reader to list the instances.

use std::time::Duration;

use callhub_id::AgentId;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use super::{InstanceStatus, InstanceSupervisor};

pub struct MonitorWorker {
    supervisor: InstanceSupervisor,
    agent_id: AgentId,
    interval: Duration,
}

impl MonitorWorker {
    pub fn new(supervisor: InstanceSupervisor, agent_id: AgentId) -> Self {
        let interval = supervisor.config().monitor_interval;
        Self {
            supervisor,
            agent_id,
            interval,
        }
    }

    /// Run until `cancel` flips to true.
    #[instrument(skip(self, cancel), fields(agent_id = %self.agent_id))]
    pub async fn run(&self, mut cancel: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "Starting instance monitor");

        let mut interval = tokio::time::interval(self.interval);
        // Skip the immediate first tick.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.check_instances().await;
                }
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        info!("Instance monitor shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Run a single health pass over the agent's instances.
    pub async fn check_instances(&self) {
        let instances = match self.supervisor.list_instances(Some(&self.agent_id)).await {
            Ok(instances) => instances,
            Err(e) => {
                error!(error = %e, "Instance health check failed");
                return;
            }
        };

        let unhealthy = instances
            .iter()
            .filter(|instance| instance.status == InstanceStatus::Error)
            .count();
        if unhealthy > 0 {
            warn!(
                total = instances.len(),
                unhealthy,
                "Agent has unhealthy instances"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::{Agent, CallRecordStore, MemoryStore, Project};
    use crate::supervisor::{
        DeploymentType, FakeWorkerLauncher, InstanceRegistry, SupervisorConfig,
    };
    use std::collections::HashMap;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_monitor_promotes_and_exits_on_cancel() {
        let store = Arc::new(MemoryStore::new());
        let project = Project::new("acme");
        let agent = Agent::new(project.id, "support", "be helpful");
        store.put_project(&project).await.unwrap();
        store.put_agent(&agent).await.unwrap();

        let clock = ManualClock::default();
        let supervisor = InstanceSupervisor::new(
            Arc::new(InstanceRegistry::new()),
            Arc::new(FakeWorkerLauncher::new()),
            store,
            Arc::new(clock.clone()),
            SupervisorConfig::default(),
        );
        let id = supervisor
            .deploy(agent.id, project.id, DeploymentType::Worker, HashMap::new())
            .await
            .unwrap();

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let worker = MonitorWorker::new(supervisor.clone(), agent.id);
        let handle = tokio::spawn(async move { worker.run(cancel_rx).await });

        clock.advance_secs(31);
        tokio::time::sleep(Duration::from_secs(31)).await;

        let instance = supervisor.registry().get(&id).await.unwrap().snapshot().await;
        assert_eq!(instance.status, InstanceStatus::Running);

        cancel_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
