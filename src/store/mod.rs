//! Entity store seam.
//!
//! The pipeline and the workflow engine only ever talk to a [`Store`]. Every
//! write that changes a candidate takes the activity describing it, and the
//! store commits both as one unit: no reader sees one without the other.
//! Conditional writes (`compare_and_set_status`, `move_membership`,
//! `save_execution`) are how concurrent writers are serialized.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::*;

pub use memory::MemoryStore;

/// Outcome of a conditional status write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusWrite {
    /// The candidate was in the expected status and now has the new one.
    Applied,
    /// Precondition failed; the candidate's actual status.
    Mismatch(CandidateStatus),
}

/// Field-level candidate mutations that do not go through the status table.
#[derive(Debug, Clone, PartialEq)]
pub enum CandidateChange {
    AddTag(String),
    RemoveTag(String),
    SetScore { criterion: String, score: f64 },
    Assign(UserId),
}

impl CandidateChange {
    /// Apply to an in-memory candidate. Returns whether anything changed.
    pub fn apply(&self, candidate: &mut Candidate) -> bool {
        match self {
            CandidateChange::AddTag(tag) => {
                if candidate.has_tag(tag) {
                    return false;
                }
                candidate.tags.push(tag.clone());
                candidate.tags.sort();
                true
            }
            CandidateChange::RemoveTag(tag) => {
                let before = candidate.tags.len();
                candidate.tags.retain(|t| t != tag);
                candidate.tags.len() != before
            }
            CandidateChange::SetScore { criterion, score } => {
                let previous = candidate.scores.insert(criterion.clone(), *score);
                previous != Some(*score)
            }
            CandidateChange::Assign(user) => {
                if candidate.assignee.as_ref() == Some(user) {
                    return false;
                }
                candidate.assignee = Some(user.clone());
                true
            }
        }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    // -- candidates ---------------------------------------------------------

    async fn insert_candidate(&self, candidate: &Candidate, activity: &Activity) -> Result<()>;

    /// `NotFound` when absent.
    async fn get_candidate(&self, id: CandidateId) -> Result<Candidate>;

    async fn list_candidates(&self) -> Result<Vec<Candidate>>;

    /// Set `to` only if the candidate is currently in `from`, appending
    /// `activity` in the same unit.
    async fn compare_and_set_status(
        &self,
        id: CandidateId,
        from: CandidateStatus,
        to: CandidateStatus,
        activity: &Activity,
    ) -> Result<StatusWrite>;

    /// Apply a change and append `activity` if it changed anything. Returns
    /// false (and appends nothing) when the change was a no-op.
    async fn update_candidate(
        &self,
        id: CandidateId,
        change: &CandidateChange,
        activity: &Activity,
    ) -> Result<bool>;

    // -- activities ---------------------------------------------------------

    async fn append_activity(&self, activity: &Activity) -> Result<()>;

    /// In insertion order.
    async fn activities_for(&self, candidate: CandidateId) -> Result<Vec<Activity>>;

    /// Up to `limit` activities appended after log position `after`, oldest
    /// first, each with its position. Positions start at 1.
    async fn activities_after(&self, after: u64, limit: usize) -> Result<Vec<(u64, Activity)>>;

    /// Position of the newest activity, 0 for an empty log.
    async fn activity_head(&self) -> Result<u64>;

    /// Most recent `status_changed` activity whose target is `to`.
    async fn latest_status_change(
        &self,
        candidate: CandidateId,
        to: CandidateStatus,
    ) -> Result<Option<Activity>>;

    // -- processes ----------------------------------------------------------

    async fn insert_process(&self, process: &Process) -> Result<()>;

    async fn get_process(&self, id: ProcessId) -> Result<Process>;

    async fn list_processes(&self) -> Result<Vec<Process>>;

    /// `Conflict` when the process is no longer in `from`.
    async fn set_process_state(
        &self,
        id: ProcessId,
        from: ProcessState,
        to: ProcessState,
        at: DateTime<Utc>,
    ) -> Result<Process>;

    // -- memberships --------------------------------------------------------

    /// `AlreadyMember` when the pair exists.
    async fn insert_membership(
        &self,
        membership: &ProcessMembership,
        activity: &Activity,
    ) -> Result<()>;

    async fn get_membership(
        &self,
        process: ProcessId,
        candidate: CandidateId,
    ) -> Result<Option<ProcessMembership>>;

    /// Move only if the member is still in `from`; `Conflict` otherwise.
    async fn move_membership(
        &self,
        process: ProcessId,
        candidate: CandidateId,
        from: &StageId,
        to: &StageId,
        activity: &Activity,
    ) -> Result<ProcessMembership>;

    async fn remove_membership(
        &self,
        process: ProcessId,
        candidate: CandidateId,
        activity: &Activity,
    ) -> Result<()>;

    async fn memberships_for_process(&self, process: ProcessId) -> Result<Vec<ProcessMembership>>;

    async fn memberships_for_candidate(
        &self,
        candidate: CandidateId,
    ) -> Result<Vec<ProcessMembership>>;

    async fn list_memberships(&self) -> Result<Vec<ProcessMembership>>;

    // -- workflows ----------------------------------------------------------

    async fn insert_workflow(&self, workflow: &Workflow) -> Result<()>;

    async fn get_workflow(&self, id: WorkflowId) -> Result<Workflow>;

    async fn list_workflows(&self) -> Result<Vec<Workflow>>;

    async fn update_workflow(&self, workflow: &Workflow) -> Result<()>;

    // -- executions ---------------------------------------------------------

    /// Returns false without writing when an execution with the same
    /// (workflow, trigger key) exists.
    async fn insert_execution(&self, execution: &WorkflowExecution) -> Result<bool>;

    async fn get_execution(&self, id: ExecutionId) -> Result<WorkflowExecution>;

    /// Overwrite only if the stored state is still `expected`.
    async fn save_execution(
        &self,
        execution: &WorkflowExecution,
        expected: ExecutionState,
    ) -> Result<()>;

    /// Executions that count toward limits, optionally for one candidate
    /// and/or created at or after `since`.
    async fn count_executions(
        &self,
        workflow: WorkflowId,
        candidate: Option<CandidateId>,
        since: Option<DateTime<Utc>>,
    ) -> Result<u32>;

    /// Pending executions whose resume time has passed.
    async fn due_executions(&self, now: DateTime<Utc>) -> Result<Vec<WorkflowExecution>>;

    async fn executions_for_workflow(&self, workflow: WorkflowId)
    -> Result<Vec<WorkflowExecution>>;

    async fn executions_for_candidate(
        &self,
        candidate: CandidateId,
    ) -> Result<Vec<WorkflowExecution>>;
}
