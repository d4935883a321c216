//! Per-agent call statistics.

use callhub_id::AgentId;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::error::{OrchestratorError, Result};
use crate::scaling;
use crate::store::{Call, CallFilter, CallRecordStore, CallStatus};
use crate::supervisor::{InstanceStatus, InstanceSupervisor};

/// Default look-back window.
pub const DEFAULT_STATS_DAYS: u32 = 7;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentStats {
    pub agent_id: AgentId,
    pub total_calls: usize,
    pub active_calls: usize,
    pub completed_calls: usize,
    pub failed_calls: usize,
    /// Mean duration of completed calls, in seconds.
    pub average_duration: f64,
    /// completed / (completed + failed), 0 with no finished call.
    pub success_rate: f64,
    pub last_24h_calls: usize,
    /// Active calls per running instance.
    pub current_load: f64,
}

impl AgentStats {
    /// Summarize `calls`, all started inside the look-back window.
    pub fn from_calls(
        agent_id: AgentId,
        calls: &[Call],
        now: DateTime<Utc>,
        running_instances: usize,
    ) -> Self {
        let count = |status: CallStatus| calls.iter().filter(|c| c.status == status).count();

        let active_calls = calls.iter().filter(|c| c.status.is_active()).count();
        let completed_calls = count(CallStatus::Completed);
        let failed_calls = count(CallStatus::Failed);

        let durations: Vec<i64> = calls
            .iter()
            .filter(|c| c.status == CallStatus::Completed)
            .filter_map(|c| c.duration_seconds)
            .filter(|d| *d > 0)
            .collect();
        let average_duration = if durations.is_empty() {
            0.0
        } else {
            durations.iter().sum::<i64>() as f64 / durations.len() as f64
        };

        let finished = completed_calls + failed_calls;
        let success_rate = if finished == 0 {
            0.0
        } else {
            completed_calls as f64 / finished as f64
        };

        let day_ago = now - Duration::hours(24);
        let last_24h_calls = calls
            .iter()
            .filter(|c| c.started_at.is_some_and(|at| at >= day_ago))
            .count();

        Self {
            agent_id,
            total_calls: calls.len(),
            active_calls,
            completed_calls,
            failed_calls,
            average_duration,
            success_rate,
            last_24h_calls,
            current_load: scaling::load(active_calls as u64, running_instances),
        }
    }
}

/// Statistics over the calls an agent started in the last `days` days.
pub async fn agent_stats(
    store: &dyn CallRecordStore,
    supervisor: &InstanceSupervisor,
    agent_id: AgentId,
    days: u32,
    now: DateTime<Utc>,
) -> Result<AgentStats> {
    let since = now
        .checked_sub_signed(Duration::days(i64::from(days)))
        .ok_or_else(|| OrchestratorError::InvalidArgument(format!("days out of range: {days}")))?;

    let calls = store
        .find_calls(&CallFilter::for_agent(agent_id).started_after(since))
        .await?;

    let running = supervisor
        .list_instances(Some(&agent_id))
        .await?
        .iter()
        .filter(|instance| instance.status == InstanceStatus::Running)
        .count();

    Ok(AgentStats::from_calls(agent_id, &calls, now, running))
}
