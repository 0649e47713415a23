//! Workflow rules: one trigger, an optional guard, an ordered list of steps.
//!
//! Definitions serialize to JSON for the store and to TOML for the files the
//! loader reads:
//!
//! ```toml
//! name = "welcome"
//! trigger = { type = "status_changed", to = ["CONTACTED"] }
//!
//! [[steps]]
//! action = { type = "add_tag", tag = "welcomed" }
//!
//! [[steps]]
//! delay_minutes = 1440
//! action = { type = "send_notification", channel = "email", recipient = { type = "candidate" }, template = "follow-up" }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    CandidateSource, CandidateStatus, ExperienceLevel, ProcessId, StageId, UserId, WorkflowId,
};
use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub name: String,
    pub description: Option<String>,
    pub active: bool,
    pub trigger: Trigger,
    pub filter: TriggerFilter,
    pub steps: Vec<WorkflowStep>,
    pub limits: ExecutionLimits,
    pub failure_policy: FailurePolicy,
    /// Bumped on every change. Executions record the version they snapshot.
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What causes a workflow to fire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    StatusChanged {
        /// Only fire when leaving one of these statuses. Empty matches any.
        #[serde(default)]
        from: Vec<CandidateStatus>,
        to: Vec<CandidateStatus>,
    },
    TagAdded {
        tags: Vec<String>,
    },
    TagRemoved {
        tags: Vec<String>,
    },
    StageEntered {
        #[serde(default)]
        process_id: Option<ProcessId>,
        stages: Vec<StageId>,
    },
    /// Evaluated by the periodic scan.
    DaysInStage {
        #[serde(default)]
        process_id: Option<ProcessId>,
        #[serde(default)]
        stage_id: Option<StageId>,
        days: u32,
    },
    /// Evaluated by the periodic scan.
    NoActivity {
        days: u32,
    },
    ScoreThreshold {
        /// `None` matches any criterion.
        #[serde(default)]
        criterion: Option<String>,
        min: f64,
    },
    InterviewScheduled,
    SlaBreached {
        #[serde(default)]
        process_id: Option<ProcessId>,
    },
    /// Only fired explicitly by an operator.
    Manual,
}

impl Trigger {
    /// Triggers that no activity can match; the scan drives them instead.
    pub fn is_time_based(&self) -> bool {
        matches!(self, Trigger::DaysInStage { .. } | Trigger::NoActivity { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Trigger::StatusChanged { .. } => "status_changed",
            Trigger::TagAdded { .. } => "tag_added",
            Trigger::TagRemoved { .. } => "tag_removed",
            Trigger::StageEntered { .. } => "stage_entered",
            Trigger::DaysInStage { .. } => "days_in_stage",
            Trigger::NoActivity { .. } => "no_activity",
            Trigger::ScoreThreshold { .. } => "score_threshold",
            Trigger::InterviewScheduled => "interview_scheduled",
            Trigger::SlaBreached { .. } => "sla_breached",
            Trigger::Manual => "manual",
        }
    }
}

/// Guard on candidate attributes. Absent filters always pass.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TriggerFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<CandidateSource>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experience_levels: Option<Vec<ExperienceLevel>>,
    /// All of these must be present on the candidate.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

// ---------------------------------------------------------------------------
// Steps and actions
// ---------------------------------------------------------------------------

/// One action plus its scheduling offset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub action: Action,
    /// Minutes after the execution's anchor time. Negative values run before
    /// the anchor (e.g. a reminder ahead of a scheduled interview).
    #[serde(default)]
    pub delay_minutes: i64,
}

impl WorkflowStep {
    pub fn now(action: Action) -> Self {
        Self {
            action,
            delay_minutes: 0,
        }
    }

    pub fn delayed(action: Action, delay_minutes: i64) -> Self {
        Self {
            action,
            delay_minutes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    SendNotification {
        channel: NotificationChannel,
        recipient: Recipient,
        template: String,
    },
    AddTag {
        tag: String,
    },
    RemoveTag {
        tag: String,
    },
    ChangeStatus {
        to: CandidateStatus,
    },
    AssignUser {
        user: UserId,
    },
    CreateTask {
        title: String,
        #[serde(default)]
        assignee: Option<UserId>,
        #[serde(default)]
        due_in_hours: Option<u32>,
    },
    CallWebhook {
        url: String,
    },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::SendNotification { .. } => "send_notification",
            Action::AddTag { .. } => "add_tag",
            Action::RemoveTag { .. } => "remove_tag",
            Action::ChangeStatus { .. } => "change_status",
            Action::AssignUser { .. } => "assign_user",
            Action::CreateTask { .. } => "create_task",
            Action::CallWebhook { .. } => "call_webhook",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    Email,
    Sms,
    InApp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Recipient {
    Candidate,
    /// Whoever the candidate is assigned to at send time.
    Assignee,
    User(UserId),
}

/// Caps enforced by counting prior executions of the rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExecutionLimits {
    #[serde(default)]
    pub max_executions_per_candidate: Option<u32>,
    /// Trailing 24 hours, across all candidates.
    #[serde(default)]
    pub max_executions_per_day: Option<u32>,
}

/// What a failed step (after retries) does to the rest of the execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    #[default]
    ContinueOnFailure,
    StopOnFailure,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// A workflow definition as authored. Registering it assigns identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewWorkflow {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    pub trigger: Trigger,
    #[serde(default)]
    pub filter: TriggerFilter,
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub limits: ExecutionLimits,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

/// Longest step delay, either side of the anchor: one year.
pub const MAX_DELAY_MINUTES: i64 = 60 * 24 * 366;
/// Longest threshold a time-based trigger may wait for.
pub const MAX_TRIGGER_DAYS: u32 = 3660;
/// Latest due time a created task may be given.
pub const MAX_TASK_DUE_HOURS: u32 = 24 * 366;

fn default_active() -> bool {
    true
}

impl NewWorkflow {
    pub fn new(name: impl Into<String>, trigger: Trigger) -> Self {
        Self {
            name: name.into(),
            description: None,
            active: true,
            trigger,
            filter: TriggerFilter::default(),
            steps: Vec::new(),
            limits: ExecutionLimits::default(),
            failure_policy: FailurePolicy::default(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn filter(mut self, filter: TriggerFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn action(self, action: Action) -> Self {
        self.step(WorkflowStep::now(action))
    }

    pub fn max_executions_per_candidate(mut self, n: u32) -> Self {
        self.limits.max_executions_per_candidate = Some(n);
        self
    }

    pub fn max_executions_per_day(mut self, n: u32) -> Self {
        self.limits.max_executions_per_day = Some(n);
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("workflow name must not be empty".into()));
        }
        match &self.trigger {
            Trigger::StatusChanged { to, .. } if to.is_empty() => Err(Error::Validation(
                "status_changed trigger needs at least one target status".into(),
            )),
            Trigger::TagAdded { tags } | Trigger::TagRemoved { tags } if tags.is_empty() => Err(
                Error::Validation("tag trigger needs at least one tag".into()),
            ),
            Trigger::StageEntered { stages, .. } if stages.is_empty() => Err(Error::Validation(
                "stage_entered trigger needs at least one stage".into(),
            )),
            Trigger::DaysInStage { days: 0, .. } | Trigger::NoActivity { days: 0 } => Err(
                Error::Validation("time-based triggers need at least one day".into()),
            ),
            Trigger::DaysInStage { days, .. } | Trigger::NoActivity { days }
                if *days > MAX_TRIGGER_DAYS =>
            {
                Err(Error::Validation(format!(
                    "time-based triggers wait at most {MAX_TRIGGER_DAYS} days, got {days}"
                )))
            }
            _ => Ok(()),
        }?;
        for step in &self.steps {
            if !(-MAX_DELAY_MINUTES..=MAX_DELAY_MINUTES).contains(&step.delay_minutes) {
                return Err(Error::Validation(format!(
                    "step delay must be within {MAX_DELAY_MINUTES} minutes of the anchor, got {}",
                    step.delay_minutes
                )));
            }
            match &step.action {
                Action::SendNotification { template, .. } if template.trim().is_empty() => {
                    return Err(Error::Validation(
                        "send_notification needs a template".into(),
                    ));
                }
                Action::AddTag { tag } | Action::RemoveTag { tag } if tag.trim().is_empty() => {
                    return Err(Error::Validation("tag actions need a tag".into()));
                }
                Action::CreateTask {
                    due_in_hours: Some(hours),
                    ..
                } if *hours > MAX_TASK_DUE_HOURS => {
                    return Err(Error::Validation(format!(
                        "task due time is at most {MAX_TASK_DUE_HOURS} hours out, got {hours}"
                    )));
                }
                Action::CallWebhook { url } if !url.starts_with("http") => {
                    return Err(Error::Validation(format!("invalid webhook url: {url}")));
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub(crate) fn into_workflow(self, now: DateTime<Utc>) -> Result<Workflow> {
        self.validate()?;
        Ok(Workflow {
            id: WorkflowId::new(),
            name: self.name,
            description: self.description,
            active: self.active,
            trigger: self.trigger,
            filter: self.filter,
            steps: self.steps,
            limits: self.limits,
            failure_policy: self.failure_policy,
            version: 1,
            created_at: now,
            updated_at: now,
        })
    }
}
