//! Postgres-backed document store.
//!
//! Every document is one row in `documents(kind, id, body)`, with the body
//! kept as JSONB so the schema of the wider application can evolve without
//! migrations here. Call queries filter on JSONB fields.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use callhub_id::{AgentId, CallId, CampaignId, ContactId, ProjectId};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info};

use super::{
    Agent, Call, CallFilter, CallRecordStore, Campaign, Contact, Project, StoreError,
    StoreResult,
};

const KIND_PROJECT: &str = "project";
const KIND_AGENT: &str = "agent";
const KIND_CONTACT: &str = "contact";
const KIND_CAMPAIGN: &str = "campaign";
const KIND_CALL: &str = "call";

/// Connection settings for [`PgStore`].
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub database_url: String,
    /// Upper bound on pooled connections; one is always kept open.
    pub pool_size: u32,
    /// How long a request waits for a free connection.
    pub acquire_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/callhub".to_string(),
            pool_size: 10,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

/// Where `run_migrations` looks, relative to the working directory first.
fn migration_dirs() -> [PathBuf; 3] {
    [
        PathBuf::from("migrations"),
        PathBuf::from("services/orchestrator/migrations"),
        Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations"),
    ]
}

/// Document store on a Postgres connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(config: &DbConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size)
            .min_connections(1)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.database_url)
            .await
            .map_err(StoreError::Connect)?;
        info!(pool_size = config.pool_size, "Connected to call record database");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply `migrations/` from the first candidate directory that exists.
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        let dirs = migration_dirs();
        let Some(dir) = dirs.iter().find(|dir| dir.is_dir()) else {
            return Err(StoreError::MigrationsMissing(
                dirs.iter().map(|d| d.display().to_string()).collect(),
            ));
        };

        let migrator = sqlx::migrate::Migrator::new(dir.as_path())
            .await
            .map_err(StoreError::Migration)?;
        migrator.run(&self.pool).await.map_err(StoreError::Migration)?;
        info!(dir = %dir.display(), "Call record schema is up to date");
        Ok(())
    }

    async fn get_doc<T: DeserializeOwned>(&self, kind: &str, id: &str) -> StoreResult<Option<T>> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT body FROM documents WHERE kind = $1 AND id = $2")
                .bind(kind)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some((body,)) => Ok(Some(serde_json::from_value(body)?)),
            None => Ok(None),
        }
    }

    async fn put_doc<T: Serialize>(&self, kind: &str, id: &str, doc: &T) -> StoreResult<()> {
        let body = serde_json::to_value(doc)?;
        sqlx::query(
            r#"
            INSERT INTO documents (kind, id, body)
            VALUES ($1, $2, $3)
            ON CONFLICT (kind, id) DO UPDATE
            SET body = EXCLUDED.body, updated_at = now()
            "#,
        )
        .bind(kind)
        .bind(id)
        .bind(body)
        .execute(&self.pool)
        .await?;

        debug!(kind, id, "Document saved");
        Ok(())
    }
}

#[async_trait]
impl CallRecordStore for PgStore {
    async fn get_project(&self, id: &ProjectId) -> StoreResult<Option<Project>> {
        self.get_doc(KIND_PROJECT, &id.to_string()).await
    }

    async fn put_project(&self, project: &Project) -> StoreResult<()> {
        self.put_doc(KIND_PROJECT, &project.id.to_string(), project)
            .await
    }

    async fn get_agent(&self, id: &AgentId) -> StoreResult<Option<Agent>> {
        self.get_doc(KIND_AGENT, &id.to_string()).await
    }

    async fn put_agent(&self, agent: &Agent) -> StoreResult<()> {
        self.put_doc(KIND_AGENT, &agent.id.to_string(), agent).await
    }

    async fn get_contact(&self, id: &ContactId) -> StoreResult<Option<Contact>> {
        self.get_doc(KIND_CONTACT, &id.to_string()).await
    }

    async fn put_contact(&self, contact: &Contact) -> StoreResult<()> {
        self.put_doc(KIND_CONTACT, &contact.id.to_string(), contact)
            .await
    }

    async fn get_campaign(&self, id: &CampaignId) -> StoreResult<Option<Campaign>> {
        self.get_doc(KIND_CAMPAIGN, &id.to_string()).await
    }

    async fn put_campaign(&self, campaign: &Campaign) -> StoreResult<()> {
        self.put_doc(KIND_CAMPAIGN, &campaign.id.to_string(), campaign)
            .await
    }

    async fn get_call(&self, id: &CallId) -> StoreResult<Option<Call>> {
        self.get_doc(KIND_CALL, &id.to_string()).await
    }

    async fn save_call(&self, call: &Call) -> StoreResult<()> {
        self.put_doc(KIND_CALL, &call.id.to_string(), call).await
    }

    async fn delete_call(&self, id: &CallId) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE kind = $1 AND id = $2")
            .bind(KIND_CALL)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_calls(&self, filter: &CallFilter) -> StoreResult<Vec<Call>> {
        let statuses: Vec<String> = filter
            .statuses
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();

        let rows: Vec<(serde_json::Value,)> = sqlx::query_as(
            r#"
            SELECT body FROM documents
            WHERE kind = 'call'
              AND ($1::text IS NULL OR body->>'project_id' = $1)
              AND ($2::text IS NULL OR body->>'agent_id' = $2)
              AND ($3::text IS NULL OR body->>'room_name' = $3)
              AND (cardinality($4::text[]) = 0 OR body->>'status' = ANY($4))
              AND ($5::timestamptz IS NULL OR (body->>'started_at')::timestamptz >= $5)
            ORDER BY created_at, id
            "#,
        )
        .bind(filter.project_id.map(|id| id.to_string()))
        .bind(filter.agent_id.map(|id| id.to_string()))
        .bind(filter.room_name.clone())
        .bind(statuses)
        .bind(filter.started_after)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(body,)| serde_json::from_value(body).map_err(StoreError::from))
            .collect()
    }

    async fn count_calls(&self, filter: &CallFilter) -> StoreResult<u64> {
        // Filters are evaluated on the decoded documents so both backends
        // agree on semantics.
        Ok(self.find_calls(filter).await?.len() as u64)
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(StoreError::Query)?;
        Ok(())
    }
}
