//! Room to agent routing entries.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use callhub_id::{AgentId, CallId, ProjectId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::OwnedMutexGuard;

use crate::locks::KeyedLocks;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteStatus {
    Active,
    Stopping,
}

/// The agent handling one room.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingEntry {
    pub room_name: String,
    pub agent_id: AgentId,
    pub project_id: ProjectId,
    pub call_id: Option<CallId>,
    pub participant_count: u32,
    pub status: RouteStatus,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RoutingStats {
    pub active_rooms: usize,
    pub total_participants: u64,
    pub rooms_by_project: BTreeMap<ProjectId, usize>,
    pub rooms_by_status: BTreeMap<&'static str, usize>,
}

/// Routing entries keyed by room name.
///
/// Mutations of one room happen under that room's lock (see
/// [`RoutingTable::lock_room`]); the map itself only guards individual reads
/// and writes.
#[derive(Default)]
pub struct RoutingTable {
    entries: RwLock<HashMap<String, RoutingEntry>>,
    rooms: KeyedLocks<String>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize every routing change of `room_name`.
    pub async fn lock_room(&self, room_name: &str) -> OwnedMutexGuard<()> {
        self.rooms.lock(&room_name.to_string()).await
    }

    pub fn get(&self, room_name: &str) -> Option<RoutingEntry> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(room_name)
            .cloned()
    }

    pub fn contains(&self, room_name: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(room_name)
    }

    /// Insert an entry. Returns false, leaving the table unchanged, if the
    /// room is already routed.
    pub fn insert(&self, entry: RoutingEntry) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.contains_key(&entry.room_name) {
            return false;
        }
        entries.insert(entry.room_name.clone(), entry);
        true
    }

    /// Apply `f` to the room's entry and return the updated copy.
    pub fn update<F>(&self, room_name: &str, f: F) -> Option<RoutingEntry>
    where
        F: FnOnce(&mut RoutingEntry),
    {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let entry = entries.get_mut(room_name)?;
        f(entry);
        Some(entry.clone())
    }

    pub fn remove(&self, room_name: &str) -> Option<RoutingEntry> {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(room_name)
    }

    pub fn snapshot(&self) -> Vec<RoutingEntry> {
        let mut entries: Vec<_> = self
            .entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> RoutingStats {
        let mut stats = RoutingStats::default();
        stats.rooms_by_status.insert("active", 0);
        stats.rooms_by_status.insert("stopping", 0);

        for entry in self.snapshot() {
            stats.active_rooms += 1;
            stats.total_participants += u64::from(entry.participant_count);
            *stats.rooms_by_project.entry(entry.project_id).or_default() += 1;
            let status = match entry.status {
                RouteStatus::Active => "active",
                RouteStatus::Stopping => "stopping",
            };
            *stats.rooms_by_status.entry(status).or_default() += 1;
        }
        stats
    }
}
