//! Orchestrator error taxonomy.
//!
//! Every collaborator failure (store, gateway, worker process) is converted
//! into one of these kinds at the operation boundary. The HTTP layer maps
//! them to problem+json responses.

use thiserror::Error;

use crate::calls::TransitionError;
use crate::gateway::GatewayError;
use crate::store::StoreError;
use crate::supervisor::SupervisorError;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Referenced document or instance is missing or inactive.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A worker process could not be spawned.
    #[error("deployment failed: {0}")]
    Deployment(String),

    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Transition out of a terminal call or instance state.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Deployment(_) => "deployment_failed",
            Self::Gateway(_) => "gateway_error",
            Self::Conflict(_) => "conflict",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::Store(_) => "store_error",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl From<TransitionError> for OrchestratorError {
    fn from(err: TransitionError) -> Self {
        Self::Conflict(err.to_string())
    }
}

impl From<SupervisorError> for OrchestratorError {
    fn from(err: SupervisorError) -> Self {
        match err {
            SupervisorError::Spawn(detail) => Self::Deployment(detail),
            SupervisorError::InvalidTransition { .. } => Self::Conflict(err.to_string()),
            SupervisorError::Signal(_) => Self::Internal(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
