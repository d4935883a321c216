//! Agent instance supervision.
//!
//! The supervisor owns the mapping from instance id to worker process:
//! - launching workers through a [`WorkerLauncher`]
//! - health polling (warm-up promotion, dead process, stale heartbeat)
//! - graceful stop with SIGKILL escalation and delayed eviction
//! - per-agent background monitor loops

mod fake;
mod instance;
mod loops;
mod monitor;
mod process;
mod registry;
mod service;

pub use fake::{FakeProcess, FakeWorkerLauncher};
pub use instance::{AgentInstance, DeploymentType, InstanceStatus};
pub use loops::{cancelled, AgentLoops, LoopKind};
pub use monitor::MonitorWorker;
pub use process::{
    OsWorkerLauncher, OsWorkerProcess, WorkerCommand, WorkerLauncher, WorkerProcessHandle,
    WorkerSpec,
};
pub use registry::{InstanceRegistry, InstanceSlot};
pub use service::{InstanceSupervisor, SupervisorConfig};

use callhub_id::InstanceId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to spawn worker: {0}")]
    Spawn(String),

    #[error("failed to signal worker: {0}")]
    Signal(#[source] nix::errno::Errno),

    #[error("instance {instance_id} cannot move from {from} to {to}")]
    InvalidTransition {
        instance_id: InstanceId,
        from: InstanceStatus,
        to: InstanceStatus,
    },
}
