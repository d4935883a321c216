//! Agent deployment, scaling and statistics endpoints.

use axum::{
    extract::{Path, State},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use callhub_id::AgentId;
use serde::{Deserialize, Serialize};

use super::reply;
use crate::api::error::ApiError;
use crate::api::extract::{parse_id, ApiJson, ApiQuery};
use crate::clock::Clock;
use crate::scaling::{DeployRequest, MetricType, ScalingRule, SystemHealth};
use crate::stats::{self, AgentStats, DEFAULT_STATS_DAYS};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/deploy", post(deploy))
        .route("/scale/{agent_id}", post(scale))
        .route("/stats/{agent_id}", get(agent_stats))
        .route("/auto-scale/rules/{agent_id}", post(set_rule))
        .route("/health", get(system_health))
}

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct ScaleQuery {
    pub target_replicas: i64,
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    #[serde(default)]
    pub days: Option<u32>,
}

/// Rule body; the agent comes from the path.
#[derive(Debug, Deserialize)]
pub struct SetRuleRequest {
    #[serde(default)]
    pub metric_type: MetricType,
    pub threshold_up: f64,
    pub threshold_down: f64,
    #[serde(default)]
    pub scale_up_replicas: Option<u32>,
    #[serde(default)]
    pub scale_down_replicas: Option<u32>,
    #[serde(default)]
    pub cooldown_minutes: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct Thresholds {
    pub scale_up: f64,
    pub scale_down: f64,
}

#[derive(Debug, Serialize)]
pub struct SetRuleResponse {
    pub agent_id: AgentId,
    pub rule_set: bool,
    pub metric_type: MetricType,
    pub thresholds: Thresholds,
    pub cooldown_minutes: u32,
}

// =============================================================================
// Handlers
// =============================================================================

/// POST /v1/deploy
async fn deploy(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<DeployRequest>,
) -> Result<Response, ApiError> {
    reply(state.scaling().deploy(request).await)
}

/// POST /v1/scale/{agent_id}?target_replicas=N
async fn scale(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    ApiQuery(query): ApiQuery<ScaleQuery>,
) -> Result<Response, ApiError> {
    let agent_id: AgentId = parse_id(&agent_id, "agent")?;
    reply(state.scaling().scale(&agent_id, query.target_replicas).await)
}

/// GET /v1/stats/{agent_id}?days=7
async fn agent_stats(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    ApiQuery(query): ApiQuery<StatsQuery>,
) -> Result<Json<AgentStats>, ApiError> {
    let agent_id: AgentId = parse_id(&agent_id, "agent")?;
    let stats = stats::agent_stats(
        state.store().as_ref(),
        state.supervisor(),
        agent_id,
        query.days.unwrap_or(DEFAULT_STATS_DAYS),
        state.clock().now(),
    )
    .await?;
    Ok(Json(stats))
}

/// POST /v1/auto-scale/rules/{agent_id}
async fn set_rule(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    ApiJson(request): ApiJson<SetRuleRequest>,
) -> Result<Json<SetRuleResponse>, ApiError> {
    let agent_id: AgentId = parse_id(&agent_id, "agent")?;

    let mut rule = ScalingRule::new(agent_id, request.threshold_up, request.threshold_down);
    rule.metric_type = request.metric_type;
    if let Some(step) = request.scale_up_replicas {
        rule.scale_up_replicas = step;
    }
    if let Some(step) = request.scale_down_replicas {
        rule.scale_down_replicas = step;
    }
    if let Some(minutes) = request.cooldown_minutes {
        rule.cooldown_minutes = minutes;
    }

    let rule = state.scaling().set_rule(rule).await?;
    Ok(Json(SetRuleResponse {
        agent_id,
        rule_set: true,
        metric_type: rule.metric_type,
        thresholds: Thresholds {
            scale_up: rule.threshold_up,
            scale_down: rule.threshold_down,
        },
        cooldown_minutes: rule.cooldown_minutes,
    }))
}

/// GET /v1/health
async fn system_health(State(state): State<AppState>) -> Result<Json<SystemHealth>, ApiError> {
    Ok(Json(state.scaling().system_health().await?))
}
