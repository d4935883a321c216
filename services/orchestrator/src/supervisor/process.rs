//! Worker process capability and the OS-backed implementation.
//!
//! Workers are spawned as leaders of their own process group so the whole
//! group (interpreter plus any children it forks) can be signalled at once.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use callhub_id::{AgentId, InstanceId, ProjectId};
use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tracing::{debug, info};

use super::{DeploymentType, SupervisorError};

/// Everything needed to launch one worker.
#[derive(Debug, Clone)]
pub struct WorkerSpec {
    pub instance_id: InstanceId,
    pub agent_id: AgentId,
    pub project_id: ProjectId,
    pub deployment_type: DeploymentType,
    /// Extra environment, applied before the identity variables.
    pub env: HashMap<String, String>,
}

impl WorkerSpec {
    /// Environment handed to the worker process.
    pub fn environment(&self) -> HashMap<String, String> {
        let mut env = self.env.clone();
        env.insert("AGENT_ID".to_string(), self.agent_id.to_string());
        env.insert("PROJECT_ID".to_string(), self.project_id.to_string());
        env.insert("INSTANCE_ID".to_string(), self.instance_id.to_string());
        env.insert(
            "DEPLOYMENT_TYPE".to_string(),
            self.deployment_type.as_str().to_string(),
        );
        env
    }
}

/// Handle to a running worker process.
pub trait WorkerProcessHandle: Send + Sync {
    fn pid(&self) -> Option<u32>;

    fn is_alive(&self) -> bool;

    /// Ask the worker to shut down (SIGTERM to its group).
    fn signal_graceful(&self) -> Result<(), SupervisorError>;

    /// Kill the worker (SIGKILL to its group).
    fn signal_force(&self) -> Result<(), SupervisorError>;
}

/// Capability to start workers.
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn start(&self, spec: &WorkerSpec) -> Result<Arc<dyn WorkerProcessHandle>, SupervisorError>;
}

/// How the OS launcher invokes worker scripts.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    /// Interpreter executable, e.g. `python3`.
    pub interpreter: String,

    /// Directory holding the worker entrypoint scripts.
    pub script_dir: PathBuf,
}

impl Default for WorkerCommand {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            script_dir: PathBuf::from("."),
        }
    }
}

/// Launches workers as child processes of the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct OsWorkerLauncher {
    command: WorkerCommand,
}

impl OsWorkerLauncher {
    pub fn new(command: WorkerCommand) -> Self {
        Self { command }
    }
}

#[async_trait]
impl WorkerLauncher for OsWorkerLauncher {
    async fn start(&self, spec: &WorkerSpec) -> Result<Arc<dyn WorkerProcessHandle>, SupervisorError> {
        let script = self
            .command
            .script_dir
            .join(spec.deployment_type.script_name());

        let child = Command::new(&self.command.interpreter)
            .arg(&script)
            .envs(spec.environment())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .process_group(0)
            .spawn()
            .map_err(|e| SupervisorError::Spawn(format!("{}: {e}", script.display())))?;

        let pid = child
            .id()
            .ok_or_else(|| SupervisorError::Spawn("worker exited before reporting a pid".to_string()))?;

        info!(
            instance_id = %spec.instance_id,
            pid,
            script = %script.display(),
            "Worker process started"
        );

        Ok(Arc::new(OsWorkerProcess {
            pid,
            child: Mutex::new(child),
        }))
    }
}

/// A spawned worker and its process group.
pub struct OsWorkerProcess {
    pid: u32,
    child: Mutex<Child>,
}

impl OsWorkerProcess {
    fn group(&self) -> Pid {
        Pid::from_raw(self.pid as i32)
    }

    fn signal_group(&self, signal: Signal) -> Result<(), SupervisorError> {
        match killpg(self.group(), signal) {
            Ok(()) => Ok(()),
            Err(Errno::ESRCH) => {
                debug!(pid = self.pid, signal = signal.as_str(), "Process group already gone");
                Ok(())
            }
            Err(errno) => Err(SupervisorError::Signal(errno)),
        }
    }
}

impl WorkerProcessHandle for OsWorkerProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn is_alive(&self) -> bool {
        // Reap first so an exited leader is not reported alive as a zombie.
        if let Ok(mut child) = self.child.lock() {
            if let Ok(Some(status)) = child.try_wait() {
                debug!(pid = self.pid, %status, "Worker process exited");
                return false;
            }
        }

        // No signal: existence and permission check only.
        kill(self.group(), None::<Signal>).is_ok()
    }

    fn signal_graceful(&self) -> Result<(), SupervisorError> {
        self.signal_group(Signal::SIGTERM)
    }

    fn signal_force(&self) -> Result<(), SupervisorError> {
        self.signal_group(Signal::SIGKILL)
    }
}
