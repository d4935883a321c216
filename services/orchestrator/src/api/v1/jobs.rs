//! Job routing endpoints.

use axum::{
    extract::State,
    response::Response,
    routing::{get, post},
    Json, Router,
};

use super::reply;
use crate::api::error::ApiError;
use crate::api::extract::ApiJson;
use crate::routing::{JobRequest, RoutingStats};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/jobs", post(route_job))
        .route("/routing/stats", get(routing_stats))
}

/// POST /v1/jobs
async fn route_job(
    State(state): State<AppState>,
    ApiJson(job): ApiJson<JobRequest>,
) -> Result<Response, ApiError> {
    reply(state.router().route_job(&job).await)
}

/// GET /v1/routing/stats
async fn routing_stats(State(state): State<AppState>) -> Json<RoutingStats> {
    Json(state.router().stats())
}
