//! Typed room metadata read by the job router.

use callhub_id::{AgentId, CallId, ProjectId};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{OrchestratorError, Result};

/// Routing fields a room carries in its metadata.
///
/// Rooms created for outbound calls also carry agent configuration and
/// contact details; those fields are ignored here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RoutingMetadata {
    #[serde(default)]
    pub agent_id: Option<AgentId>,
    #[serde(default)]
    pub project_id: Option<ProjectId>,
    #[serde(default)]
    pub call_id: Option<CallId>,
}

impl RoutingMetadata {
    /// Parse the metadata string of a room. Blank metadata has no routing
    /// fields.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(raw).map_err(|e| {
            OrchestratorError::InvalidArgument(format!("malformed room metadata: {e}"))
        })
    }

    /// Accept metadata either as an encoded JSON string or as an object.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Self::default()),
            Value::String(raw) => Self::parse(raw),
            Value::Object(_) => Self::deserialize(value).map_err(|e| {
                OrchestratorError::InvalidArgument(format!("malformed room metadata: {e}"))
            }),
            other => Err(OrchestratorError::InvalidArgument(format!(
                "room metadata must be a JSON object, got {other}"
            ))),
        }
    }
}
