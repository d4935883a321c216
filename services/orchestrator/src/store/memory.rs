//! In-memory document store.

use std::collections::HashMap;

use async_trait::async_trait;
use callhub_id::{AgentId, CallId, CampaignId, ContactId, ProjectId};
use tokio::sync::RwLock;

use super::{
    Agent, Call, CallFilter, CallRecordStore, Campaign, Contact, Project, StoreResult,
};

#[derive(Default)]
struct Documents {
    projects: HashMap<ProjectId, Project>,
    agents: HashMap<AgentId, Agent>,
    contacts: HashMap<ContactId, Contact>,
    campaigns: HashMap<CampaignId, Campaign>,
    calls: HashMap<CallId, Call>,
}

/// Store keeping every document in process memory.
#[derive(Default)]
pub struct MemoryStore {
    docs: RwLock<Documents>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CallRecordStore for MemoryStore {
    async fn get_project(&self, id: &ProjectId) -> StoreResult<Option<Project>> {
        Ok(self.docs.read().await.projects.get(id).cloned())
    }

    async fn put_project(&self, project: &Project) -> StoreResult<()> {
        self.docs
            .write()
            .await
            .projects
            .insert(project.id, project.clone());
        Ok(())
    }

    async fn get_agent(&self, id: &AgentId) -> StoreResult<Option<Agent>> {
        Ok(self.docs.read().await.agents.get(id).cloned())
    }

    async fn put_agent(&self, agent: &Agent) -> StoreResult<()> {
        self.docs.write().await.agents.insert(agent.id, agent.clone());
        Ok(())
    }

    async fn get_contact(&self, id: &ContactId) -> StoreResult<Option<Contact>> {
        Ok(self.docs.read().await.contacts.get(id).cloned())
    }

    async fn put_contact(&self, contact: &Contact) -> StoreResult<()> {
        self.docs
            .write()
            .await
            .contacts
            .insert(contact.id, contact.clone());
        Ok(())
    }

    async fn get_campaign(&self, id: &CampaignId) -> StoreResult<Option<Campaign>> {
        Ok(self.docs.read().await.campaigns.get(id).cloned())
    }

    async fn put_campaign(&self, campaign: &Campaign) -> StoreResult<()> {
        self.docs
            .write()
            .await
            .campaigns
            .insert(campaign.id, campaign.clone());
        Ok(())
    }

    async fn get_call(&self, id: &CallId) -> StoreResult<Option<Call>> {
        Ok(self.docs.read().await.calls.get(id).cloned())
    }

    async fn save_call(&self, call: &Call) -> StoreResult<()> {
        self.docs.write().await.calls.insert(call.id, call.clone());
        Ok(())
    }

    async fn delete_call(&self, id: &CallId) -> StoreResult<bool> {
        Ok(self.docs.write().await.calls.remove(id).is_some())
    }

    async fn find_calls(&self, filter: &CallFilter) -> StoreResult<Vec<Call>> {
        let docs = self.docs.read().await;
        let mut calls: Vec<Call> = docs
            .calls
            .values()
            .filter(|call| filter.matches(call))
            .cloned()
            .collect();
        calls.sort_by_key(|call| (call.created_at, call.id));
        Ok(calls)
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }
}
