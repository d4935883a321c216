//! Per-agent auto-scale loop.

use std::time::Duration;

use callhub_id::AgentId;
use tokio::sync::watch;
use tracing::{error, info, instrument};

use super::{ReplicaBounds, ScalingController};

pub struct AutoScaleWorker {
    controller: ScalingController,
    agent_id: AgentId,
    bounds: ReplicaBounds,
    interval: Duration,
}

impl AutoScaleWorker {
    pub fn new(controller: ScalingController, agent_id: AgentId, bounds: ReplicaBounds) -> Self {
        let interval = controller.config().auto_scale_interval;
        Self {
            controller,
            agent_id,
            bounds,
            interval,
        }
    }

    /// Run until `cancel` flips to true.
    #[instrument(skip(self, cancel), fields(agent_id = %self.agent_id))]
    pub async fn run(&self, mut cancel: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            min_replicas = self.bounds.min,
            max_replicas = self.bounds.max,
            "Starting auto-scaler"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.controller.auto_scale_once(&self.agent_id, self.bounds).await {
                        error!(error = %e, "Auto-scaling pass failed");
                    }
                }
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        info!("Auto-scaler shutting down");
                        break;
                    }
                }
            }
        }
    }
}
