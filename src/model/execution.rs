//! Workflow executions: one firing of a rule for one candidate.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{ActivityId, CandidateId, ExecutionId, WorkflowId, WorkflowStep};
use crate::error::Error;

/// A single firing of a workflow, with its own snapshot of the steps so
/// later edits to the rule never change work already in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: ExecutionId,
    pub workflow_id: WorkflowId,
    pub workflow_version: u32,
    pub candidate_id: CandidateId,

    /// Dedup key: a workflow fires at most once per key. The triggering
    /// activity id for event triggers, a synthetic key for scan triggers.
    pub trigger_key: String,
    pub trigger_activity_id: Option<ActivityId>,

    pub state: ExecutionState,
    pub steps: Vec<WorkflowStep>,
    pub results: Vec<ActionResult>,
    /// Index of the next step to run.
    pub next_step: usize,

    /// Step delays are measured from here.
    pub anchor_at: DateTime<Utc>,
    /// When a paused (pending) execution becomes due.
    pub resume_at: Option<DateTime<Utc>>,
    pub skip_reason: Option<SkipReason>,

    /// Cascade depth of the activity that fired it.
    pub depth: u32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl WorkflowExecution {
    /// Due time of the step at `index`. `None` past the last step or when
    /// the delay does not fit the calendar.
    pub fn step_due_at(&self, index: usize) -> Option<DateTime<Utc>> {
        let step = self.steps.get(index)?;
        let delay = Duration::try_minutes(step.delay_minutes)?;
        self.anchor_at.checked_add_signed(delay)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.state == ExecutionState::Pending && self.resume_at.is_none_or(|at| at <= now)
    }

    /// Result slot for the current step, if it has been attempted already.
    pub(crate) fn current_result_mut(&mut self) -> Option<&mut ActionResult> {
        let step = self.next_step;
        self.results.iter_mut().find(|r| r.step == step)
    }

    /// Terminal outcome once every step has been recorded: failed when the
    /// last result failed or nothing succeeded, completed otherwise.
    pub(crate) fn final_state(&self) -> ExecutionState {
        if self.results.is_empty() {
            return ExecutionState::Completed;
        }
        let last_failed = self
            .results
            .last()
            .is_some_and(|r| r.status == ActionStatus::Failed);
        let any_succeeded = self
            .results
            .iter()
            .any(|r| r.status == ActionStatus::Succeeded);
        if last_failed || !any_succeeded {
            ExecutionState::Failed
        } else {
            ExecutionState::Completed
        }
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    /// Created, or paused waiting for a delay or a retry.
    Pending,
    /// Claimed by a runner, steps executing.
    Running,
    Completed,
    Failed,
    /// Never ran: inactive rule, guard false, or rate limited.
    Skipped,
    /// Revoked by an operator before it ran to completion.
    Cancelled,
}

impl ExecutionState {
    pub fn can_transition_to(self, to: ExecutionState) -> bool {
        use ExecutionState::*;
        matches!(
            (self, to),
            (Pending, Running)
                | (Pending, Skipped)
                | (Pending, Cancelled)
                | (Running, Pending)    // paused for a delay or retry
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Skipped)    // rule deactivated after firing
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionState::Completed
                | ExecutionState::Failed
                | ExecutionState::Skipped
                | ExecutionState::Cancelled
        )
    }

    /// Whether the execution counts against rate limits.
    pub fn counts_toward_limits(self) -> bool {
        !matches!(self, ExecutionState::Skipped | ExecutionState::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionState::Pending => "pending",
            ExecutionState::Running => "running",
            ExecutionState::Completed => "completed",
            ExecutionState::Failed => "failed",
            ExecutionState::Skipped => "skipped",
            ExecutionState::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExecutionState::Pending),
            "running" => Ok(ExecutionState::Running),
            "completed" => Ok(ExecutionState::Completed),
            "failed" => Ok(ExecutionState::Failed),
            "skipped" => Ok(ExecutionState::Skipped),
            "cancelled" => Ok(ExecutionState::Cancelled),
            other => Err(Error::Validation(format!("unknown execution state: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    WorkflowInactive,
    GuardFailed,
    RateLimited,
}

// ---------------------------------------------------------------------------
// Per-step results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub step: usize,
    pub action: String,
    pub status: ActionStatus,
    pub attempts: u32,
    pub error: Option<String>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    /// Attempted, waiting for a retry.
    Retrying,
    Succeeded,
    Failed,
}
