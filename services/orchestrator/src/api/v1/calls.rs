//! Call endpoints: outbound dialing and explicit transitions.

use axum::{
    extract::{Path, State},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use callhub_id::CallId;
use serde::Deserialize;

use super::reply;
use crate::api::error::ApiError;
use crate::api::extract::{parse_id, ApiJson, OptionalJson};
use crate::calls::{OutboundCall, OutboundCallRequest, TransferKind};
use crate::state::AppState;
use crate::store::Call;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/outbound", post(initiate_outbound))
        .route("/{call_id}", get(get_call))
        .route("/{call_id}/start", post(start_call))
        .route("/{call_id}/answer", post(answer_call))
        .route("/{call_id}/end", post(end_call))
        .route("/{call_id}/fail", post(fail_call))
        .route("/{call_id}/transfer", post(transfer_call))
}

// =============================================================================
// Request Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct StartCallRequest {
    pub room_name: String,
    #[serde(default)]
    pub participant_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EndCallRequest {
    #[serde(default)]
    pub outcome: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FailCallRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TransferCallRequest {
    pub destination: String,
    #[serde(default)]
    pub kind: TransferKind,
}

// =============================================================================
// Handlers
// =============================================================================

fn call_id(raw: &str) -> Result<CallId, ApiError> {
    parse_id(raw, "call")
}

/// POST /v1/calls/outbound
async fn initiate_outbound(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<OutboundCallRequest>,
) -> Result<Json<OutboundCall>, ApiError> {
    Ok(Json(state.calls().initiate_outbound(request).await?))
}

/// GET /v1/calls/{call_id}
async fn get_call(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Call>, ApiError> {
    Ok(Json(state.calls().get(&call_id(&id)?).await?))
}

/// POST /v1/calls/{call_id}/start
async fn start_call(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(request): ApiJson<StartCallRequest>,
) -> Result<Response, ApiError> {
    let id = call_id(&id)?;
    reply(
        state
            .calls()
            .start(&id, &request.room_name, request.participant_id.as_deref())
            .await,
    )
}

/// POST /v1/calls/{call_id}/answer
async fn answer_call(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    reply(state.calls().answer(&call_id(&id)?).await)
}

/// POST /v1/calls/{call_id}/end
async fn end_call(
    State(state): State<AppState>,
    Path(id): Path<String>,
    OptionalJson(request): OptionalJson<EndCallRequest>,
) -> Result<Response, ApiError> {
    let id = call_id(&id)?;
    reply(state.calls().end(&id, request.outcome.as_deref()).await)
}

/// POST /v1/calls/{call_id}/fail
async fn fail_call(
    State(state): State<AppState>,
    Path(id): Path<String>,
    OptionalJson(request): OptionalJson<FailCallRequest>,
) -> Result<Response, ApiError> {
    let id = call_id(&id)?;
    reply(state.calls().fail(&id, request.reason.as_deref()).await)
}

/// POST /v1/calls/{call_id}/transfer
async fn transfer_call(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(request): ApiJson<TransferCallRequest>,
) -> Result<Response, ApiError> {
    let id = call_id(&id)?;
    reply(
        state
            .calls()
            .transfer(&id, &request.destination, request.kind)
            .await,
    )
}
