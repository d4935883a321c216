//! Application state shared across request handlers.

use std::sync::Arc;

use tokio::sync::watch;

use crate::calls::{CallConfig, CallService};
use crate::clock::Clock;
use crate::gateway::RoomGateway;
use crate::routing::{JobRouter, RoutingTable};
use crate::scaling::{ScalingConfig, ScalingController};
use crate::store::CallRecordStore;
use crate::supervisor::{
    AgentLoops, InstanceRegistry, InstanceSupervisor, SupervisorConfig, WorkerLauncher,
};

/// Timing and dialing settings for the services behind the API.
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    pub supervisor: SupervisorConfig,
    pub scaling: ScalingConfig,
    pub calls: CallConfig,
}

/// External collaborators the services are built on.
pub struct Collaborators {
    pub store: Arc<dyn CallRecordStore>,
    pub gateway: Arc<dyn RoomGateway>,
    pub launcher: Arc<dyn WorkerLauncher>,
    pub clock: Arc<dyn Clock>,
}

/// Shared application state.
///
/// Owns the instance registry and routing table; nothing else in the
/// process holds them.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    store: Arc<dyn CallRecordStore>,
    clock: Arc<dyn Clock>,
    supervisor: InstanceSupervisor,
    scaling: ScalingController,
    calls: CallService,
    router: JobRouter,
}

impl AppState {
    /// Wire the services together. Background work stops once `shutdown`
    /// flips to true.
    pub fn new(
        collaborators: Collaborators,
        config: ServiceConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let Collaborators {
            store,
            gateway,
            launcher,
            clock,
        } = collaborators;

        let supervisor = InstanceSupervisor::new(
            Arc::new(InstanceRegistry::new()),
            launcher,
            store.clone(),
            clock.clone(),
            config.supervisor,
        );
        let scaling = ScalingController::new(
            supervisor.clone(),
            store.clone(),
            clock.clone(),
            Arc::new(AgentLoops::new()),
            config.scaling,
        );
        let calls = CallService::new(store.clone(), gateway, clock.clone(), config.calls)
            .with_shutdown(shutdown);
        let router = JobRouter::new(Arc::new(RoutingTable::new()), calls.clone());

        Self {
            inner: Arc::new(AppStateInner {
                store,
                clock,
                supervisor,
                scaling,
                calls,
                router,
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn CallRecordStore> {
        &self.inner.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    pub fn supervisor(&self) -> &InstanceSupervisor {
        &self.inner.supervisor
    }

    pub fn scaling(&self) -> &ScalingController {
        &self.inner.scaling
    }

    pub fn calls(&self) -> &CallService {
        &self.inner.calls
    }

    pub fn router(&self) -> &JobRouter {
        &self.inner.router
    }
}
