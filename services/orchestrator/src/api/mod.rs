//! The orchestrator's HTTP surface: probes at the root, everything else
//! under `/v1`.

pub mod error;
mod extract;
mod health;
mod v1;

use axum::{
    http::{header, Method},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::state::AppState;

/// Dashboards call the API straight from the browser.
fn dashboard_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/v1", v1::routes())
        .merge(health::routes())
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(dashboard_cors())
        .with_state(state)
}
