//! Replica scaling.
//!
//! Manual scaling brings an agent to an exact replica count. Automatic
//! scaling compares active calls per running instance against the agent's
//! [`ScalingRule`] once a minute, within the deployment's replica bounds
//! and outside the rule's cooldown.

mod controller;
mod health;
mod rule;
mod worker;

pub use controller::{
    DeployRequest, Deployment, ScaleAction, ScaleOutcome, ScalingConfig, ScalingController,
};
pub use health::{load, HealthStatus, SystemHealth};
pub use rule::{decide, MetricType, ReplicaBounds, ScalingDecision, ScalingRule};
pub use worker::AutoScaleWorker;
