//! Agent instance records.

use callhub_id::{AgentId, InstanceId, ProjectId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::SupervisorError;

/// Voice pipeline flavour a worker runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentType {
    #[default]
    Worker,
    Multimodal,
    Basic,
}

impl DeploymentType {
    pub fn as_str(self) -> &'static str {
        match self {
            DeploymentType::Worker => "worker",
            DeploymentType::Multimodal => "multimodal",
            DeploymentType::Basic => "basic",
        }
    }

    /// Entrypoint script run by the worker interpreter.
    pub fn script_name(self) -> &'static str {
        match self {
            DeploymentType::Worker => "agent_worker.py",
            DeploymentType::Multimodal => "multimodal_agent.py",
            DeploymentType::Basic => "agent.py",
        }
    }
}

/// Lifecycle of a worker instance.
///
/// Statuses only move forward through `starting -> running -> stopping ->
/// stopped`; `error` is reachable from any live status. `stopped` and
/// `error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
}

impl InstanceStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, InstanceStatus::Stopped | InstanceStatus::Error)
    }

    /// Starting or running: counts towards an agent's replicas.
    pub fn is_active(self) -> bool {
        matches!(self, InstanceStatus::Starting | InstanceStatus::Running)
    }

    fn rank(self) -> u8 {
        match self {
            InstanceStatus::Starting => 0,
            InstanceStatus::Running => 1,
            InstanceStatus::Stopping => 2,
            InstanceStatus::Stopped => 3,
            InstanceStatus::Error => 4,
        }
    }

    pub fn can_transition_to(self, next: InstanceStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == InstanceStatus::Error || next.rank() > self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InstanceStatus::Starting => "starting",
            InstanceStatus::Running => "running",
            InstanceStatus::Stopping => "stopping",
            InstanceStatus::Stopped => "stopped",
            InstanceStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One worker process serving an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInstance {
    pub instance_id: InstanceId,
    pub agent_id: AgentId,
    pub project_id: ProjectId,
    pub deployment_type: DeploymentType,
    pub status: InstanceStatus,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

impl AgentInstance {
    /// Move to `next`, rejecting backwards or post-terminal moves.
    pub fn transition(&mut self, next: InstanceStatus) -> Result<(), SupervisorError> {
        if !self.status.can_transition_to(next) {
            return Err(SupervisorError::InvalidTransition {
                instance_id: self.instance_id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}
