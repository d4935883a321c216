//! Call state transitions.
//!
//! ```text
//! initiated -> ringing -> answered -> completed
//!      |          |           |
//!      |          +-> agent_assigned (worker took the room, behaves as ringing)
//!      |          +-> no_answer
//!      +----------+-----------+-> failed | transferred
//! ```
//!
//! Every function here is pure: it takes the current time explicitly and
//! either mutates the call or returns an error leaving it untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::{Call, CallStatus};

/// Rejected transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// The call already reached a terminal status.
    #[error("call is already {status}")]
    Terminal { status: CallStatus },

    /// The call is live but not in a status the transition accepts.
    #[error("cannot {action} a call that is {status}")]
    InvalidState {
        action: &'static str,
        status: CallStatus,
    },
}

/// How a call is handed to its transfer destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    #[default]
    Attended,
    Blind,
}

impl TransferKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransferKind::Attended => "attended",
            TransferKind::Blind => "blind",
        }
    }
}

const RINGING: &[CallStatus] = &[CallStatus::Ringing, CallStatus::AgentAssigned];
const LIVE: &[CallStatus] = &[
    CallStatus::Ringing,
    CallStatus::AgentAssigned,
    CallStatus::Answered,
];

fn guard(call: &Call, action: &'static str, allowed: &[CallStatus]) -> Result<(), TransitionError> {
    if call.status.is_terminal() {
        return Err(TransitionError::Terminal {
            status: call.status,
        });
    }
    if !allowed.contains(&call.status) {
        return Err(TransitionError::InvalidState {
            action,
            status: call.status,
        });
    }
    Ok(())
}

/// Close the call at `now`, keeping `answered_at <= ended_at`.
fn close(call: &mut Call, status: CallStatus, now: DateTime<Utc>) {
    let ended_at = match call.answered_at {
        Some(answered_at) if now < answered_at => answered_at,
        _ => now,
    };
    call.status = status;
    call.ended_at = Some(ended_at);
}

/// Bind the call to a room and start ringing.
pub fn start(
    call: &mut Call,
    room_name: &str,
    participant_id: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(), TransitionError> {
    guard(call, "start", &[CallStatus::Initiated])?;

    call.status = CallStatus::Ringing;
    call.room_name = Some(room_name.to_string());
    if let Some(participant_id) = participant_id {
        call.participant_id = Some(participant_id.to_string());
    }
    if call.started_at.is_none() {
        call.started_at = Some(now);
    }
    Ok(())
}

/// Record that a worker picked up the call's room.
pub fn assign_agent(
    call: &mut Call,
    room_name: &str,
    now: DateTime<Utc>,
) -> Result<(), TransitionError> {
    guard(
        call,
        "assign an agent to",
        &[CallStatus::Initiated, CallStatus::Ringing],
    )?;

    call.status = CallStatus::AgentAssigned;
    call.room_name = Some(room_name.to_string());
    if call.started_at.is_none() {
        call.started_at = Some(now);
    }
    Ok(())
}

pub fn answer(call: &mut Call, now: DateTime<Utc>) -> Result<(), TransitionError> {
    guard(call, "answer", RINGING)?;

    call.status = CallStatus::Answered;
    call.answered_at = Some(now);
    Ok(())
}

/// Complete the call. Duration is only recorded for answered calls.
pub fn end(
    call: &mut Call,
    outcome: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(), TransitionError> {
    guard(call, "end", LIVE)?;

    close(call, CallStatus::Completed, now);
    if let (Some(answered_at), Some(ended_at)) = (call.answered_at, call.ended_at) {
        call.duration_seconds = Some((ended_at - answered_at).num_seconds());
    }
    if let Some(outcome) = outcome {
        call.call_outcome = Some(outcome.to_string());
    }
    Ok(())
}

pub fn fail(call: &mut Call, reason: Option<&str>, now: DateTime<Utc>) -> Result<(), TransitionError> {
    guard(
        call,
        "fail",
        &[
            CallStatus::Initiated,
            CallStatus::Ringing,
            CallStatus::AgentAssigned,
            CallStatus::Answered,
        ],
    )?;

    close(call, CallStatus::Failed, now);
    call.call_outcome = Some(format!("Failed: {}", reason.unwrap_or("unknown")));
    Ok(())
}

/// Record a failure with the exact outcome text, e.g. a gateway error.
pub fn fail_with_outcome(
    call: &mut Call,
    outcome: String,
    now: DateTime<Utc>,
) -> Result<(), TransitionError> {
    fail(call, None, now)?;
    call.call_outcome = Some(outcome);
    Ok(())
}

/// Only a call that is still ringing can go unanswered. A worker having
/// taken the room does not mean the customer picked up.
pub fn mark_no_answer(call: &mut Call, now: DateTime<Utc>) -> Result<(), TransitionError> {
    guard(call, "mark no-answer on", RINGING)?;

    close(call, CallStatus::NoAnswer, now);
    call.call_outcome = Some("No answer".to_string());
    Ok(())
}

pub fn transfer(
    call: &mut Call,
    destination: &str,
    kind: TransferKind,
    now: DateTime<Utc>,
) -> Result<(), TransitionError> {
    guard(call, "transfer", LIVE)?;

    close(call, CallStatus::Transferred, now);
    if let (Some(answered_at), Some(ended_at)) = (call.answered_at, call.ended_at) {
        call.duration_seconds = Some((ended_at - answered_at).num_seconds());
    }
    call.call_outcome = Some(format!("Transferred to {destination} ({})", kind.as_str()));
    Ok(())
}
