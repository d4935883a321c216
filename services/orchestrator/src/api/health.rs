//! Probe endpoints for load balancers.
//!
//! All three answer with a [`ProbeReport`]. `/livez` and `/healthz` only
//! prove the process answers; `/readyz` also pings the call record store.

use std::collections::BTreeMap;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;

use crate::clock::Clock;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ProbeReport {
    pub ready: bool,
    pub version: String,
    /// Taken from the service clock, so tests see their own time.
    pub checked_at: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub checks: BTreeMap<String, DependencyCheck>,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct DependencyCheck {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProbeReport {
    fn at(state: &AppState) -> Self {
        Self {
            ready: true,
            version: env!("CARGO_PKG_VERSION").to_string(),
            checked_at: state.clock().now().to_rfc3339(),
            checks: BTreeMap::new(),
        }
    }

    fn record(&mut self, name: &str, outcome: Result<(), String>) {
        self.ready &= outcome.is_ok();
        self.checks.insert(
            name.to_string(),
            DependencyCheck {
                ok: outcome.is_ok(),
                error: outcome.err(),
            },
        );
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/livez", get(alive))
        .route("/healthz", get(alive))
        .route("/readyz", get(readyz))
}

async fn alive(State(state): State<AppState>) -> Json<ProbeReport> {
    Json(ProbeReport::at(&state))
}

async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let mut report = ProbeReport::at(&state);
    let store = state.store().health_check().await.map_err(|e| e.to_string());
    report.record("store", store);

    // Probes only need a non-2xx; the API reports failures as 500.
    let status = if report.ready {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(report))
}
