//! Agent instance endpoints.

use axum::{
    extract::{Path, State},
    response::Response,
    routing::{delete, get},
    Json, Router,
};
use callhub_id::{AgentId, InstanceId};
use serde::{Deserialize, Serialize};

use super::reply;
use crate::api::error::ApiError;
use crate::api::extract::{parse_id, ApiQuery};
use crate::state::AppState;
use crate::supervisor::{AgentInstance, InstanceStatus};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_instances))
        .route("/{instance_id}", delete(stop_instance))
}

#[derive(Debug, Deserialize)]
pub struct ListInstancesQuery {
    /// Only instances of this agent.
    #[serde(default)]
    pub agent_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListInstancesResponse {
    pub items: Vec<AgentInstance>,
}

#[derive(Debug, Serialize)]
pub struct StopInstanceResponse {
    pub instance_id: InstanceId,
    pub status: InstanceStatus,
    pub message: String,
}

/// GET /v1/instances?agent_id=
async fn list_instances(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<ListInstancesQuery>,
) -> Result<Json<ListInstancesResponse>, ApiError> {
    let agent_id: Option<AgentId> = query
        .agent_id
        .as_deref()
        .map(|raw| parse_id(raw, "agent"))
        .transpose()?;

    let items = state.supervisor().list_instances(agent_id.as_ref()).await?;
    Ok(Json(ListInstancesResponse { items }))
}

/// DELETE /v1/instances/{instance_id}
///
/// Marks the instance stopping and returns; the worker is signalled in the
/// background.
async fn stop_instance(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
) -> Result<Response, ApiError> {
    let instance_id: InstanceId = parse_id(&instance_id, "instance")?;
    let result = state
        .supervisor()
        .stop_in_background(&instance_id)
        .await
        .map(|instance| StopInstanceResponse {
            instance_id: instance.instance_id,
            status: instance.status,
            message: "Instance stop initiated".to_string(),
        });
    reply(result)
}
