//! Per-agent background loops.
//!
//! Each agent can have at most one loop of each kind. Every loop receives a
//! dedicated cancellation channel; cancelling an agent (or the whole
//! process) flips it to `true` and the loop exits after its current
//! iteration.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

use callhub_id::AgentId;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopKind {
    /// Periodic health polling of the agent's instances.
    Monitor,
    /// Periodic load-based scaling.
    AutoScale,
}

struct RunningLoop {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
pub struct AgentLoops {
    loops: Mutex<HashMap<(AgentId, LoopKind), RunningLoop>>,
}

impl AgentLoops {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a loop unless one of the same kind is already running for the
    /// agent. Returns whether a new loop was started.
    pub fn spawn<F, Fut>(&self, agent_id: AgentId, kind: LoopKind, run: F) -> bool
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut loops = self.loops.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = loops.get(&(agent_id, kind)) {
            if !existing.handle.is_finished() {
                return false;
            }
        }

        let (cancel, cancelled) = watch::channel(false);
        let handle = tokio::spawn(run(cancelled));
        loops.insert((agent_id, kind), RunningLoop { cancel, handle });
        debug!(agent_id = %agent_id, kind = ?kind, "Agent loop started");
        true
    }

    pub fn is_running(&self, agent_id: &AgentId, kind: LoopKind) -> bool {
        self.loops
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(*agent_id, kind))
            .map(|running| !running.handle.is_finished())
            .unwrap_or(false)
    }

    /// Cancel every loop of one agent. Returns the handles so callers can
    /// wait for the loops to exit.
    pub fn cancel_agent(&self, agent_id: &AgentId) -> Vec<JoinHandle<()>> {
        let mut loops = self.loops.lock().unwrap_or_else(|e| e.into_inner());
        let keys: Vec<_> = loops
            .keys()
            .filter(|(id, _)| id == agent_id)
            .copied()
            .collect();

        let handles: Vec<_> = keys
            .into_iter()
            .filter_map(|key| loops.remove(&key))
            .map(|running| {
                let _ = running.cancel.send(true);
                running.handle
            })
            .collect();

        if !handles.is_empty() {
            info!(agent_id = %agent_id, loops = handles.len(), "Agent loops cancelled");
        }
        handles
    }

    /// Cancel every loop, e.g. on process shutdown.
    pub fn cancel_all(&self) -> Vec<JoinHandle<()>> {
        let mut loops = self.loops.lock().unwrap_or_else(|e| e.into_inner());
        loops
            .drain()
            .map(|(_, running)| {
                let _ = running.cancel.send(true);
                running.handle
            })
            .collect()
    }
}

/// Resolve once `cancel` flips to true or its sender is dropped.
pub async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow() {
            return;
        }
        if cancel.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_one_loop_per_kind() {
        let loops = AgentLoops::new();
        let agent = AgentId::new();

        assert!(loops.spawn(agent, LoopKind::Monitor, |mut cancel| async move {
            cancelled(&mut cancel).await;
        }));
        assert!(!loops.spawn(agent, LoopKind::Monitor, |mut cancel| async move {
            cancelled(&mut cancel).await;
        }));
        assert!(loops.spawn(agent, LoopKind::AutoScale, |mut cancel| async move {
            cancelled(&mut cancel).await;
        }));
        assert!(loops.is_running(&agent, LoopKind::Monitor));

        let handles = loops.cancel_agent(&agent);
        assert_eq!(handles.len(), 2);
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(!loops.is_running(&agent, LoopKind::Monitor));
    }

    #[tokio::test]
    async fn test_cancel_all() {
        let loops = AgentLoops::new();
        for _ in 0..3 {
            loops.spawn(AgentId::new(), LoopKind::Monitor, |mut cancel| async move {
                cancelled(&mut cancel).await;
            });
        }
        let handles = loops.cancel_all();
        assert_eq!(handles.len(), 3);
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
