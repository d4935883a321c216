//! Shared harness for orchestrator integration tests.
//!
//! Wires the real services over the in-memory store, the fake worker
//! launcher, the mock room gateway and a manual clock.

#![allow(dead_code)]

use std::sync::Arc;

use callhub_orchestrator::calls::CallConfig;
use callhub_orchestrator::clock::ManualClock;
use callhub_orchestrator::gateway::MockGateway;
use callhub_orchestrator::state::{AppState, Collaborators, ServiceConfig};
use callhub_orchestrator::store::{Agent, CallRecordStore, MemoryStore, Project};
use callhub_orchestrator::supervisor::FakeWorkerLauncher;
use chrono::{TimeZone, Utc};
use tokio::sync::watch;

pub const TEST_TRUNK: &str = "ST_test_trunk";

pub struct Harness {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub gateway: Arc<MockGateway>,
    pub launcher: Arc<FakeWorkerLauncher>,
    pub clock: ManualClock,
    pub shutdown: watch::Sender<bool>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ServiceConfig {
            calls: CallConfig {
                sip_trunk_id: TEST_TRUNK.to_string(),
                ..CallConfig::default()
            },
            ..ServiceConfig::default()
        })
    }

    pub fn with_config(config: ServiceConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(MockGateway::new());
        let launcher = Arc::new(FakeWorkerLauncher::new());
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap());
        let (shutdown, shutdown_rx) = watch::channel(false);

        let state = AppState::new(
            Collaborators {
                store: store.clone(),
                gateway: gateway.clone(),
                launcher: launcher.clone(),
                clock: Arc::new(clock.clone()),
            },
            config,
            shutdown_rx,
        );

        Self {
            state,
            store,
            gateway,
            launcher,
            clock,
            shutdown,
        }
    }

    /// Store an active project with one active agent.
    pub async fn seed_agent(&self) -> (Project, Agent) {
        let project = Project::new("acme");
        let agent = Agent::new(project.id, "support", "You answer support calls.");
        self.store.put_project(&project).await.unwrap();
        self.store.put_agent(&agent).await.unwrap();
        (project, agent)
    }

    /// Store a second active project with no agents of its own.
    pub async fn seed_other_project(&self) -> Project {
        let project = Project::new("globex");
        self.store.put_project(&project).await.unwrap();
        project
    }

    /// Store an agent that has been switched off.
    pub async fn seed_inactive_agent(&self, project: &Project) -> Agent {
        let mut agent = Agent::new(project.id, "retired", "Unused.");
        agent.is_active = false;
        self.store.put_agent(&agent).await.unwrap();
        agent
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
        for handle in self.state.scaling().loops().cancel_all() {
            handle.abort();
        }
    }
}
