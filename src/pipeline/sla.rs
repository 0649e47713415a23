//! Time-in-stage SLA tracking. Pure computation; nothing here is stored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{CandidateId, StageId};

/// Share of the SLA after which a candidate is flagged at risk.
pub const AT_RISK_PERCENT: i64 = 70;

const MS_PER_HOUR: i64 = 3_600_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlaStatus {
    OnTrack,
    AtRisk,
    Breached,
}

impl std::fmt::Display for SlaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SlaStatus::OnTrack => "on_track",
            SlaStatus::AtRisk => "at_risk",
            SlaStatus::Breached => "breached",
        };
        f.write_str(s)
    }
}

/// SLA status of a stage entered at `entered_at`, seen at `now`.
///
/// Breached strictly past the SLA; at risk from 70% of it. Stages without an
/// SLA are always on track. Integer milliseconds, so the thresholds are exact.
pub fn status(entered_at: DateTime<Utc>, now: DateTime<Utc>, sla_hours: Option<u32>) -> SlaStatus {
    let Some(hours) = sla_hours else {
        return SlaStatus::OnTrack;
    };
    let elapsed_ms = (now - entered_at).num_milliseconds();
    let sla_ms = i64::from(hours) * MS_PER_HOUR;
    if elapsed_ms > sla_ms {
        SlaStatus::Breached
    } else if elapsed_ms * 100 >= sla_ms * AT_RISK_PERCENT {
        SlaStatus::AtRisk
    } else {
        SlaStatus::OnTrack
    }
}

/// One row of a process SLA report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaEntry {
    pub candidate_id: CandidateId,
    pub stage_id: StageId,
    pub entered_stage_at: DateTime<Utc>,
    pub sla_hours: Option<u32>,
    pub status: SlaStatus,
}
