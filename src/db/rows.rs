//! Internal row types for sqlx::FromRow.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use uuid::Uuid;

use crate::error::Result;
use crate::model::*;

pub(super) const CANDIDATE_COLUMNS: &str = "id, first_name, last_name, email, phone, source, experience_level, status, tags, scores, assignee, last_contacted_at, created_at, updated_at";

#[derive(sqlx::FromRow)]
pub(super) struct CandidateRow {
    id: Uuid,
    first_name: String,
    last_name: String,
    email: String,
    phone: Option<String>,
    source: String,
    experience_level: Option<String>,
    status: String,
    tags: Json<Vec<String>>,
    scores: Json<BTreeMap<String, f64>>,
    assignee: Option<String>,
    last_contacted_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl CandidateRow {
    pub(super) fn try_into_candidate(self) -> Result<Candidate> {
        Ok(Candidate {
            id: CandidateId(self.id),
            first_name: self.first_name,
            last_name: self.last_name,
            email: self.email,
            phone: self.phone,
            source: self.source.parse()?,
            experience_level: self
                .experience_level
                .as_deref()
                .map(str::parse)
                .transpose()?,
            status: self.status.parse()?,
            tags: self.tags.0,
            scores: self.scores.0,
            assignee: self.assignee.map(UserId),
            last_contacted_at: self.last_contacted_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

pub(super) const ACTIVITY_COLUMNS: &str = "id, candidate_id, occurred_at, actor, depth, kind";

#[derive(sqlx::FromRow)]
pub(super) struct ActivityRow {
    id: Uuid,
    candidate_id: Uuid,
    occurred_at: DateTime<Utc>,
    actor: Json<Actor>,
    depth: i32,
    kind: Json<ActivityKind>,
}

/// An activity with its log position.
#[derive(sqlx::FromRow)]
pub(super) struct PositionedActivityRow {
    pub(super) seq: i64,
    #[sqlx(flatten)]
    pub(super) activity: ActivityRow,
}

impl ActivityRow {
    pub(super) fn into_activity(self) -> Activity {
        Activity {
            id: ActivityId(self.id),
            candidate_id: CandidateId(self.candidate_id),
            timestamp: self.occurred_at,
            actor: self.actor.0,
            depth: u32::try_from(self.depth).unwrap_or(0),
            kind: self.kind.0,
        }
    }
}

pub(super) const PROCESS_COLUMNS: &str =
    "id, name, description, state, stages, transitions, created_at, updated_at";

#[derive(sqlx::FromRow)]
pub(super) struct ProcessRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    state: String,
    stages: Json<Vec<Stage>>,
    transitions: Option<Json<BTreeMap<StageId, BTreeSet<StageId>>>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ProcessRow {
    pub(super) fn try_into_process(self) -> Result<Process> {
        Ok(Process {
            id: ProcessId(self.id),
            name: self.name,
            description: self.description,
            state: self.state.parse()?,
            stages: self.stages.0,
            transitions: self.transitions.map(|t| t.0),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

pub(super) const MEMBERSHIP_COLUMNS: &str =
    "process_id, candidate_id, stage_id, entered_stage_at, added_at";

#[derive(sqlx::FromRow)]
pub(super) struct MembershipRow {
    process_id: Uuid,
    candidate_id: Uuid,
    stage_id: String,
    entered_stage_at: DateTime<Utc>,
    added_at: DateTime<Utc>,
}

impl From<MembershipRow> for ProcessMembership {
    fn from(row: MembershipRow) -> Self {
        Self {
            process_id: ProcessId(row.process_id),
            candidate_id: CandidateId(row.candidate_id),
            stage_id: StageId(row.stage_id),
            entered_stage_at: row.entered_stage_at,
            added_at: row.added_at,
        }
    }
}
