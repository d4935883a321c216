//! Instance registry.
//!
//! The registry is the authoritative map from instance id to worker process
//! and status. The map itself sits behind a read-write lock that is only
//! held long enough to insert, remove or clone slot handles; each slot
//! carries its own mutex so mutations of one instance never wait on
//! another.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use callhub_id::{AgentId, InstanceId};
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, MutexGuard, RwLock};

use super::{AgentInstance, WorkerProcessHandle};

/// Registry entry for one instance.
pub struct InstanceSlot {
    instance_id: InstanceId,
    agent_id: AgentId,
    started_at: DateTime<Utc>,
    process: Option<Arc<dyn WorkerProcessHandle>>,
    record: Mutex<AgentInstance>,
    reaping: AtomicBool,
}

impl InstanceSlot {
    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    pub fn agent_id(&self) -> AgentId {
        self.agent_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn process(&self) -> Option<&Arc<dyn WorkerProcessHandle>> {
        self.process.as_ref()
    }

    /// Exclusive access to the instance record.
    pub async fn lock(&self) -> MutexGuard<'_, AgentInstance> {
        self.record.lock().await
    }

    pub async fn snapshot(&self) -> AgentInstance {
        self.record.lock().await.clone()
    }

    /// True for the first caller only. Guards the shutdown of an `error`
    /// instance, whose status cannot record that a stop is under way.
    pub fn claim_reap(&self) -> bool {
        !self.reaping.swap(true, Ordering::AcqRel)
    }
}

#[derive(Default)]
pub struct InstanceRegistry {
    slots: RwLock<HashMap<InstanceId, Arc<InstanceSlot>>>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(
        &self,
        instance: AgentInstance,
        process: Option<Arc<dyn WorkerProcessHandle>>,
    ) -> Arc<InstanceSlot> {
        let slot = Arc::new(InstanceSlot {
            instance_id: instance.instance_id,
            agent_id: instance.agent_id,
            started_at: instance.started_at,
            process,
            record: Mutex::new(instance),
            reaping: AtomicBool::new(false),
        });
        self.slots
            .write()
            .await
            .insert(slot.instance_id, slot.clone());
        slot
    }

    pub async fn get(&self, id: &InstanceId) -> Option<Arc<InstanceSlot>> {
        self.slots.read().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &InstanceId) -> bool {
        self.slots.write().await.remove(id).is_some()
    }

    /// Slots for one agent (or all agents), oldest first.
    pub async fn slots(&self, agent_id: Option<&AgentId>) -> Vec<Arc<InstanceSlot>> {
        let mut slots: Vec<_> = self
            .slots
            .read()
            .await
            .values()
            .filter(|slot| agent_id.map_or(true, |agent_id| &slot.agent_id == agent_id))
            .cloned()
            .collect();
        slots.sort_by_key(|slot| (slot.started_at, slot.instance_id));
        slots
    }

    /// Point-in-time copy of the matching records, oldest first.
    pub async fn snapshot(&self, agent_id: Option<&AgentId>) -> Vec<AgentInstance> {
        let mut records = Vec::new();
        for slot in self.slots(agent_id).await {
            records.push(slot.snapshot().await);
        }
        records
    }

    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::{DeploymentType, InstanceStatus};
    use callhub_id::ProjectId;
    use chrono::Duration;

    fn instance(agent_id: AgentId, started_at: DateTime<Utc>) -> AgentInstance {
        AgentInstance {
            instance_id: InstanceId::new(),
            agent_id,
            project_id: ProjectId::new(),
            deployment_type: DeploymentType::Worker,
            status: InstanceStatus::Starting,
            pid: None,
            started_at,
            last_heartbeat: started_at,
        }
    }

    #[tokio::test]
    async fn test_slots_are_filtered_and_ordered() {
        let registry = InstanceRegistry::new();
        let agent = AgentId::new();
        let now = Utc::now();

        let newer = registry.insert(instance(agent, now), None).await;
        let older = registry
            .insert(instance(agent, now - Duration::seconds(60)), None)
            .await;
        registry.insert(instance(AgentId::new(), now), None).await;

        let slots = registry.slots(Some(&agent)).await;
        let ids: Vec<_> = slots.iter().map(|s| s.instance_id()).collect();
        assert_eq!(ids, vec![older.instance_id(), newer.instance_id()]);
        assert_eq!(registry.len().await, 3);
    }

    #[tokio::test]
    async fn test_snapshot_is_detached() {
        let registry = InstanceRegistry::new();
        let slot = registry
            .insert(instance(AgentId::new(), Utc::now()), None)
            .await;

        let before = registry.snapshot(None).await;
        slot.lock().await.status = InstanceStatus::Running;

        assert_eq!(before[0].status, InstanceStatus::Starting);
        assert!(registry.remove(&slot.instance_id()).await);
        assert!(registry.is_empty().await);
    }
}
