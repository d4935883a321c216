//! Call record store.
//!
//! Projects, agents, contacts, campaigns and calls live in a document store
//! owned by the wider call-center application. The orchestrator reads the
//! configuration documents and mutates call documents as calls progress.
//!
//! Two backends are provided:
//! - [`MemoryStore`] for tests and single-process development
//! - [`PgStore`] keeping each document as JSONB in Postgres (SQLx)

mod error;
mod memory;
mod models;
mod postgres;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use models::{Agent, Call, CallStatus, CallType, Campaign, Contact, Project};
pub use postgres::{DbConfig, PgStore};

use async_trait::async_trait;
use callhub_id::{AgentId, CallId, CampaignId, ContactId, ProjectId};
use chrono::{DateTime, Utc};

/// Field filters for call queries. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct CallFilter {
    pub project_id: Option<ProjectId>,
    pub agent_id: Option<AgentId>,
    pub room_name: Option<String>,
    pub statuses: Vec<CallStatus>,
    pub started_after: Option<DateTime<Utc>>,
}

impl CallFilter {
    pub fn for_agent(agent_id: AgentId) -> Self {
        Self {
            agent_id: Some(agent_id),
            ..Default::default()
        }
    }

    pub fn in_room(room_name: impl Into<String>) -> Self {
        Self {
            room_name: Some(room_name.into()),
            ..Default::default()
        }
    }

    pub fn with_statuses(mut self, statuses: impl IntoIterator<Item = CallStatus>) -> Self {
        self.statuses = statuses.into_iter().collect();
        self
    }

    pub fn started_after(mut self, at: DateTime<Utc>) -> Self {
        self.started_after = Some(at);
        self
    }

    /// Whether `call` satisfies every set field.
    pub fn matches(&self, call: &Call) -> bool {
        if let Some(project_id) = &self.project_id {
            if &call.project_id != project_id {
                return false;
            }
        }
        if let Some(agent_id) = &self.agent_id {
            if call.agent_id.as_ref() != Some(agent_id) {
                return false;
            }
        }
        if let Some(room_name) = &self.room_name {
            if call.room_name.as_deref() != Some(room_name.as_str()) {
                return false;
            }
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&call.status) {
            return false;
        }
        if let Some(after) = self.started_after {
            match call.started_at {
                Some(started_at) if started_at >= after => {}
                _ => return false,
            }
        }
        true
    }
}

/// CRUD interface over the call-center document store.
#[async_trait]
pub trait CallRecordStore: Send + Sync {
    async fn get_project(&self, id: &ProjectId) -> StoreResult<Option<Project>>;
    async fn put_project(&self, project: &Project) -> StoreResult<()>;

    async fn get_agent(&self, id: &AgentId) -> StoreResult<Option<Agent>>;
    async fn put_agent(&self, agent: &Agent) -> StoreResult<()>;

    async fn get_contact(&self, id: &ContactId) -> StoreResult<Option<Contact>>;
    async fn put_contact(&self, contact: &Contact) -> StoreResult<()>;

    async fn get_campaign(&self, id: &CampaignId) -> StoreResult<Option<Campaign>>;
    async fn put_campaign(&self, campaign: &Campaign) -> StoreResult<()>;

    async fn get_call(&self, id: &CallId) -> StoreResult<Option<Call>>;

    /// Insert or replace a call document.
    async fn save_call(&self, call: &Call) -> StoreResult<()>;

    /// Returns false if no such call existed.
    async fn delete_call(&self, id: &CallId) -> StoreResult<bool>;

    /// Calls matching `filter`, oldest first.
    async fn find_calls(&self, filter: &CallFilter) -> StoreResult<Vec<Call>>;

    async fn count_calls(&self, filter: &CallFilter) -> StoreResult<u64> {
        Ok(self.find_calls(filter).await?.len() as u64)
    }

    /// Check that the backend is reachable.
    async fn health_check(&self) -> StoreResult<()>;
}
