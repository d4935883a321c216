//! System-wide load summary.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Load below this is healthy.
pub const WARNING_LOAD: f64 = 0.8;

/// Load at or above this is critical.
pub const CRITICAL_LOAD: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

impl HealthStatus {
    pub fn from_load(load: f64) -> Self {
        if load < WARNING_LOAD {
            HealthStatus::Healthy
        } else if load < CRITICAL_LOAD {
            HealthStatus::Warning
        } else {
            HealthStatus::Critical
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemHealth {
    pub timestamp: DateTime<Utc>,
    pub total_instances: usize,
    pub running_instances: usize,
    pub active_calls: u64,
    /// Active calls per running instance, 0 with no running instance.
    pub system_load: f64,
    pub health_status: HealthStatus,
}

impl SystemHealth {
    pub fn new(
        timestamp: DateTime<Utc>,
        total_instances: usize,
        running_instances: usize,
        active_calls: u64,
    ) -> Self {
        let system_load = load(active_calls, running_instances);
        Self {
            timestamp,
            total_instances,
            running_instances,
            active_calls,
            system_load,
            health_status: HealthStatus::from_load(system_load),
        }
    }
}

/// Calls per running instance.
pub fn load(active_calls: u64, running_instances: usize) -> f64 {
    if running_instances == 0 {
        0.0
    } else {
        active_calls as f64 / running_instances as f64
    }
}
