//! API v1 routes.

mod agents;
mod calls;
mod instances;
mod jobs;
mod webhooks;

use axum::{
    response::{IntoResponse, Response},
    Json, Router,
};
use serde::Serialize;

use crate::api::error::ApiError;
use crate::error::OrchestratorError;
use crate::state::AppState;

/// Create API v1 routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(agents::routes())
        .nest("/instances", instances::routes())
        .merge(jobs::routes())
        .nest("/calls", calls::routes())
        .nest("/webhooks", webhooks::routes())
}

/// Body returned instead of an error when a request lost a race with a
/// terminal state.
#[derive(Debug, Serialize)]
struct NotApplied {
    applied: bool,
    conflict: String,
}

/// Render an operation result. Conflicts are a 200 no-op body.
fn reply<T: Serialize>(result: crate::error::Result<T>) -> Result<Response, ApiError> {
    match result {
        Ok(value) => Ok(Json(value).into_response()),
        Err(OrchestratorError::Conflict(detail)) => Ok(Json(NotApplied {
            applied: false,
            conflict: detail,
        })
        .into_response()),
        Err(e) => Err(e.into()),
    }
}
