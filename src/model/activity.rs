//! Activities: the immutable audit trail of everything that happens to a
//! candidate.
//!
//! The UI renders them as a feed; the workflow engine treats them as its only
//! source of "what happened". Each kind carries exactly the fields it needs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    ActivityId, Actor, CandidateId, CandidateStatus, ExecutionId, ProcessId, StageId, UserId,
    WorkflowId,
};
use crate::model::workflow::{NotificationChannel, Recipient};

/// One immutable entry in a candidate's activity log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: ActivityId,
    pub candidate_id: CandidateId,
    pub timestamp: DateTime<Utc>,
    pub actor: Actor,
    /// How many workflow hops led here. Human and scan activities are 0.
    #[serde(default)]
    pub depth: u32,
    pub kind: ActivityKind,
}

impl Activity {
    pub fn new(candidate_id: CandidateId, actor: Actor, kind: ActivityKind) -> Self {
        Self {
            id: ActivityId::new(),
            candidate_id,
            timestamp: Utc::now(),
            actor,
            depth: 0,
            kind,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivityKind {
    CandidateCreated {
        source: super::CandidateSource,
    },
    StatusChanged {
        from: CandidateStatus,
        to: CandidateStatus,
    },
    TagAdded {
        tag: String,
    },
    TagRemoved {
        tag: String,
    },
    AddedToProcess {
        process_id: ProcessId,
        stage_id: StageId,
    },
    StageChanged {
        process_id: ProcessId,
        from: StageId,
        to: StageId,
    },
    RemovedFromProcess {
        process_id: ProcessId,
        stage_id: StageId,
    },
    ScoreUpdated {
        criterion: String,
        score: f64,
        previous: Option<f64>,
    },
    InterviewScheduled {
        scheduled_at: DateTime<Utc>,
        interviewer: Option<UserId>,
    },
    NoteAdded {
        text: String,
    },
    UserAssigned {
        user: UserId,
    },
    TaskCreated {
        title: String,
        assignee: Option<UserId>,
        due_at: Option<DateTime<Utc>>,
    },
    NotificationSent {
        channel: NotificationChannel,
        recipient: Recipient,
        template: String,
    },
    WebhookCalled {
        url: String,
        status: u16,
    },
    SlaBreached {
        process_id: ProcessId,
        stage_id: StageId,
        entered_stage_at: DateTime<Utc>,
    },
    WorkflowFired {
        workflow_id: WorkflowId,
        execution_id: ExecutionId,
    },
}

impl ActivityKind {
    /// Stable name of the variant, as stored and as shown in feeds.
    pub fn name(&self) -> &'static str {
        match self {
            ActivityKind::CandidateCreated { .. } => "candidate_created",
            ActivityKind::StatusChanged { .. } => "status_changed",
            ActivityKind::TagAdded { .. } => "tag_added",
            ActivityKind::TagRemoved { .. } => "tag_removed",
            ActivityKind::AddedToProcess { .. } => "added_to_process",
            ActivityKind::StageChanged { .. } => "stage_changed",
            ActivityKind::RemovedFromProcess { .. } => "removed_from_process",
            ActivityKind::ScoreUpdated { .. } => "score_updated",
            ActivityKind::InterviewScheduled { .. } => "interview_scheduled",
            ActivityKind::NoteAdded { .. } => "note_added",
            ActivityKind::UserAssigned { .. } => "user_assigned",
            ActivityKind::TaskCreated { .. } => "task_created",
            ActivityKind::NotificationSent { .. } => "notification_sent",
            ActivityKind::WebhookCalled { .. } => "webhook_called",
            ActivityKind::SlaBreached { .. } => "sla_breached",
            ActivityKind::WorkflowFired { .. } => "workflow_fired",
        }
    }

    /// Engine bookkeeping does not count as activity on the candidate; the
    /// no-activity clock ignores it.
    pub fn is_engagement(&self) -> bool {
        !matches!(
            self,
            ActivityKind::SlaBreached { .. } | ActivityKind::WorkflowFired { .. }
        )
    }
}
