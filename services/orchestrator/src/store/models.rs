//! Documents persisted in the call record store.

use callhub_id::{AgentId, CallId, CampaignId, ContactId, ProjectId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A tenant project grouping agents, contacts and campaigns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: ProjectId::new(),
            name: name.into(),
            description: None,
            is_active: true,
            created_at: Utc::now(),
        }
    }
}

/// A logical voice agent configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub project_id: ProjectId,
    pub name: String,
    pub prompt: String,
    #[serde(default)]
    pub voice_settings: serde_json::Value,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Agent {
    pub fn new(project_id: ProjectId, name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: AgentId::new(),
            project_id,
            name: name.into(),
            prompt: prompt.into(),
            voice_settings: serde_json::Value::Null,
            is_active: true,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: ContactId,
    pub project_id: ProjectId,
    pub name: String,
    pub phone_number: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Contact {
    pub fn new(
        project_id: ProjectId,
        name: impl Into<String>,
        phone_number: impl Into<String>,
    ) -> Self {
        Self {
            id: ContactId::new(),
            project_id,
            name: name.into(),
            phone_number: phone_number.into(),
            email: None,
            notes: None,
            tags: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub project_id: ProjectId,
    #[serde(default)]
    pub agent_id: Option<AgentId>,
    pub name: String,
    pub status: String,
}

/// Direction of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallType {
    Inbound,
    Outbound,
}

/// Lifecycle state of a call.
///
/// `AgentAssigned` marks that a worker picked up the call's room; telephony
/// events keep driving the call from there exactly as from `Ringing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Initiated,
    Ringing,
    AgentAssigned,
    Answered,
    Completed,
    Failed,
    NoAnswer,
    Transferred,
}

impl CallStatus {
    /// Statuses that count as an in-progress call for load and health.
    pub const ACTIVE: [CallStatus; 3] = [
        CallStatus::Ringing,
        CallStatus::AgentAssigned,
        CallStatus::Answered,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CallStatus::Completed
                | CallStatus::Failed
                | CallStatus::NoAnswer
                | CallStatus::Transferred
        )
    }

    pub fn is_active(self) -> bool {
        Self::ACTIVE.contains(&self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CallStatus::Initiated => "initiated",
            CallStatus::Ringing => "ringing",
            CallStatus::AgentAssigned => "agent_assigned",
            CallStatus::Answered => "answered",
            CallStatus::Completed => "completed",
            CallStatus::Failed => "failed",
            CallStatus::NoAnswer => "no_answer",
            CallStatus::Transferred => "transferred",
        }
    }
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single call and its transport bindings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    pub id: CallId,
    pub project_id: ProjectId,
    #[serde(default)]
    pub campaign_id: Option<CampaignId>,
    #[serde(default)]
    pub contact_id: Option<ContactId>,
    #[serde(default)]
    pub agent_id: Option<AgentId>,

    pub call_type: CallType,
    pub phone_number: String,

    #[serde(default)]
    pub room_name: Option<String>,
    #[serde(default)]
    pub participant_id: Option<String>,
    #[serde(default)]
    pub sip_call_id: Option<String>,

    pub status: CallStatus,

    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub answered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_seconds: Option<i64>,

    #[serde(default)]
    pub call_outcome: Option<String>,
    #[serde(default)]
    pub call_summary: Option<String>,
    #[serde(default)]
    pub analysis: Option<serde_json::Value>,

    pub created_at: DateTime<Utc>,
}

impl Call {
    /// A fresh call in the `initiated` state.
    pub fn new(
        project_id: ProjectId,
        call_type: CallType,
        phone_number: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: CallId::new(),
            project_id,
            campaign_id: None,
            contact_id: None,
            agent_id: None,
            call_type,
            phone_number: phone_number.into(),
            room_name: None,
            participant_id: None,
            sip_call_id: None,
            status: CallStatus::Initiated,
            started_at: None,
            answered_at: None,
            ended_at: None,
            duration_seconds: None,
            call_outcome: None,
            call_summary: None,
            analysis: None,
            created_at,
        }
    }

    pub fn with_agent(mut self, agent_id: AgentId) -> Self {
        self.agent_id = Some(agent_id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_status_serializes_snake_case() {
        let json = serde_json::to_string(&CallStatus::NoAnswer).unwrap();
        assert_eq!(json, "\"no_answer\"");
        let json = serde_json::to_string(&CallStatus::AgentAssigned).unwrap();
        assert_eq!(json, "\"agent_assigned\"");
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(CallStatus::Completed.is_terminal());
        assert!(CallStatus::Failed.is_terminal());
        assert!(CallStatus::NoAnswer.is_terminal());
        assert!(CallStatus::Transferred.is_terminal());
        assert!(!CallStatus::Answered.is_terminal());
        assert!(!CallStatus::AgentAssigned.is_terminal());
    }

    #[test]
    fn test_call_document_defaults_missing_fields() {
        let call = Call::new(ProjectId::new(), CallType::Outbound, "+15550100", Utc::now());
        let mut value = serde_json::to_value(&call).unwrap();
        let obj = value.as_object_mut().unwrap();
        obj.remove("analysis");
        obj.remove("call_summary");
        let parsed: Call = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.id, call.id);
        assert!(parsed.analysis.is_none());
    }
}
