//! Scaling rules and the pure decision function.

use callhub_id::AgentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};

/// Metric a rule is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    /// Active calls per running instance.
    #[default]
    CallQueue,
    Cpu,
    Memory,
    ResponseTime,
}

impl MetricType {
    pub fn as_str(self) -> &'static str {
        match self {
            MetricType::CallQueue => "call_queue",
            MetricType::Cpu => "cpu",
            MetricType::Memory => "memory",
            MetricType::ResponseTime => "response_time",
        }
    }
}

fn default_replica_step() -> u32 {
    1
}

fn default_cooldown_minutes() -> u32 {
    5
}

/// Auto-scaling rule for one agent. The last rule written wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingRule {
    pub agent_id: AgentId,

    #[serde(default)]
    pub metric_type: MetricType,

    /// Scale up when the metric is strictly above this.
    pub threshold_up: f64,

    /// Scale down when the metric is strictly below this.
    pub threshold_down: f64,

    #[serde(default = "default_replica_step")]
    pub scale_up_replicas: u32,

    #[serde(default = "default_replica_step")]
    pub scale_down_replicas: u32,

    /// Minimum gap between two automatic actions for the agent.
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: u32,
}

impl ScalingRule {
    pub fn new(agent_id: AgentId, threshold_up: f64, threshold_down: f64) -> Self {
        Self {
            agent_id,
            metric_type: MetricType::CallQueue,
            threshold_up,
            threshold_down,
            scale_up_replicas: default_replica_step(),
            scale_down_replicas: default_replica_step(),
            cooldown_minutes: default_cooldown_minutes(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.threshold_up.is_finite() || !self.threshold_down.is_finite() {
            return Err(OrchestratorError::InvalidArgument(
                "scaling thresholds must be finite numbers".to_string(),
            ));
        }
        if self.threshold_down > self.threshold_up {
            return Err(OrchestratorError::InvalidArgument(format!(
                "threshold_down ({}) is above threshold_up ({})",
                self.threshold_down, self.threshold_up
            )));
        }
        Ok(())
    }

    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.cooldown_minutes))
    }

    /// Whether an action taken at `last_action` still blocks a new one.
    pub fn in_cooldown(&self, last_action: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match last_action {
            Some(at) => now - at < self.cooldown(),
            None => false,
        }
    }
}

/// Inclusive replica bounds for automatic scaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaBounds {
    pub min: u32,
    pub max: u32,
}

impl ReplicaBounds {
    pub fn new(min: u32, max: u32) -> Result<Self> {
        if min > max {
            return Err(OrchestratorError::InvalidArgument(format!(
                "min_replicas ({min}) is above max_replicas ({max})"
            )));
        }
        Ok(Self { min, max })
    }
}

impl Default for ReplicaBounds {
    fn default() -> Self {
        Self { min: 1, max: 5 }
    }
}

/// Outcome of evaluating a rule.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ScalingDecision {
    None,
    ScaleUp { count: u32, reason: String },
    ScaleDown { count: u32, reason: String },
}

impl ScalingDecision {
    /// Replica target once the decision is applied to `current`.
    pub fn target(&self, current: u32) -> u32 {
        match self {
            ScalingDecision::None => current,
            ScalingDecision::ScaleUp { count, .. } => current.saturating_add(*count),
            ScalingDecision::ScaleDown { count, .. } => current.saturating_sub(*count),
        }
    }
}

/// Compare `load` against the rule for an agent with `current` replicas.
///
/// Steps are cut short at the bounds, so applying the decision never leaves
/// `[bounds.min, bounds.max]` from inside it.
pub fn decide(rule: &ScalingRule, load: f64, current: u32, bounds: ReplicaBounds) -> ScalingDecision {
    if load > rule.threshold_up && current < bounds.max {
        let count = rule.scale_up_replicas.min(bounds.max - current);
        if count > 0 {
            return ScalingDecision::ScaleUp {
                count,
                reason: format!("load {load:.2} above {:.2}", rule.threshold_up),
            };
        }
    }

    if load < rule.threshold_down && current > bounds.min {
        let count = rule.scale_down_replicas.min(current - bounds.min);
        if count > 0 {
            return ScalingDecision::ScaleDown {
                count,
                reason: format!("load {load:.2} below {:.2}", rule.threshold_down),
            };
        }
    }

    ScalingDecision::None
}
