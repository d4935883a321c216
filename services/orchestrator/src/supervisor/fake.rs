//! In-memory worker processes for tests and dry runs.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::info;

use super::{SupervisorError, WorkerLauncher, WorkerProcessHandle, WorkerSpec};

/// A pretend worker whose liveness is controlled by the test.
#[derive(Debug)]
pub struct FakeProcess {
    pid: u32,
    alive: AtomicBool,
    exits_on_sigterm: bool,
    graceful_signals: AtomicU32,
    force_signals: AtomicU32,
}

impl FakeProcess {
    pub fn pid_value(&self) -> u32 {
        self.pid
    }

    /// Simulate the worker crashing.
    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub fn graceful_signals(&self) -> u32 {
        self.graceful_signals.load(Ordering::SeqCst)
    }

    pub fn force_signals(&self) -> u32 {
        self.force_signals.load(Ordering::SeqCst)
    }

    /// Whether any signal was ever sent to the process.
    pub fn was_signalled(&self) -> bool {
        self.graceful_signals() > 0 || self.force_signals() > 0
    }
}

impl WorkerProcessHandle for FakeProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn signal_graceful(&self) -> Result<(), SupervisorError> {
        self.graceful_signals.fetch_add(1, Ordering::SeqCst);
        if self.exits_on_sigterm {
            self.kill();
        }
        Ok(())
    }

    fn signal_force(&self) -> Result<(), SupervisorError> {
        self.force_signals.fetch_add(1, Ordering::SeqCst);
        self.kill();
        Ok(())
    }
}

/// Launcher handing out [`FakeProcess`]es.
#[derive(Debug)]
pub struct FakeWorkerLauncher {
    next_pid: AtomicU32,
    fail_starts: AtomicBool,
    ignore_sigterm: AtomicBool,
    launched: Mutex<Vec<(WorkerSpec, Arc<FakeProcess>)>>,
}

impl FakeWorkerLauncher {
    pub fn new() -> Self {
        Self {
            next_pid: AtomicU32::new(10_000),
            fail_starts: AtomicBool::new(false),
            ignore_sigterm: AtomicBool::new(false),
            launched: Mutex::new(Vec::new()),
        }
    }

    /// Make subsequent starts fail as if the interpreter were missing.
    pub fn fail_starts(&self, fail: bool) {
        self.fail_starts.store(fail, Ordering::SeqCst);
    }

    /// Make subsequently launched processes survive SIGTERM.
    pub fn ignore_sigterm(&self, ignore: bool) {
        self.ignore_sigterm.store(ignore, Ordering::SeqCst);
    }

    /// Every process launched so far, oldest first.
    pub fn processes(&self) -> Vec<Arc<FakeProcess>> {
        self.launched
            .lock()
            .map(|launched| launched.iter().map(|(_, p)| p.clone()).collect())
            .unwrap_or_default()
    }

    /// Specs passed to `start`, oldest first.
    pub fn specs(&self) -> Vec<WorkerSpec> {
        self.launched
            .lock()
            .map(|launched| launched.iter().map(|(s, _)| s.clone()).collect())
            .unwrap_or_default()
    }

    pub fn process(&self, pid: u32) -> Option<Arc<FakeProcess>> {
        self.processes().into_iter().find(|p| p.pid == pid)
    }
}

impl Default for FakeWorkerLauncher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkerLauncher for FakeWorkerLauncher {
    async fn start(&self, spec: &WorkerSpec) -> Result<Arc<dyn WorkerProcessHandle>, SupervisorError> {
        if self.fail_starts.load(Ordering::SeqCst) {
            return Err(SupervisorError::Spawn(
                "fake launcher configured to fail".to_string(),
            ));
        }

        let process = Arc::new(FakeProcess {
            pid: self.next_pid.fetch_add(1, Ordering::SeqCst),
            alive: AtomicBool::new(true),
            exits_on_sigterm: !self.ignore_sigterm.load(Ordering::SeqCst),
            graceful_signals: AtomicU32::new(0),
            force_signals: AtomicU32::new(0),
        });

        info!(instance_id = %spec.instance_id, pid = process.pid, "[FAKE] Worker started");

        if let Ok(mut launched) = self.launched.lock() {
            launched.push((spec.clone(), process.clone()));
        }
        Ok(process)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::DeploymentType;
    use callhub_id::{AgentId, InstanceId, ProjectId};
    use std::collections::HashMap;

    fn spec() -> WorkerSpec {
        WorkerSpec {
            instance_id: InstanceId::new(),
            agent_id: AgentId::new(),
            project_id: ProjectId::new(),
            deployment_type: DeploymentType::Worker,
            env: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_fake_process_lifecycle() {
        let launcher = FakeWorkerLauncher::new();
        let handle = launcher.start(&spec()).await.unwrap();
        assert!(handle.is_alive());

        handle.signal_graceful().unwrap();
        assert!(!handle.is_alive());
        assert_eq!(launcher.processes()[0].graceful_signals(), 1);
    }

    #[tokio::test]
    async fn test_stubborn_process_needs_force() {
        let launcher = FakeWorkerLauncher::new();
        launcher.ignore_sigterm(true);
        let handle = launcher.start(&spec()).await.unwrap();

        handle.signal_graceful().unwrap();
        assert!(handle.is_alive());
        handle.signal_force().unwrap();
        assert!(!handle.is_alive());
    }

    #[tokio::test]
    async fn test_failing_launcher() {
        let launcher = FakeWorkerLauncher::new();
        launcher.fail_starts(true);
        assert!(launcher.start(&spec()).await.is_err());
        assert!(launcher.processes().is_empty());
    }
}
