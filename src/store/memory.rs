//! In-process store. Every operation runs under one lock, which is what makes
//! the candidate + activity writes atomic here.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{CandidateChange, StatusWrite, Store};
use crate::error::{Error, Result};
use crate::model::*;

#[derive(Default)]
struct Inner {
    candidates: HashMap<CandidateId, Candidate>,
    activities: Vec<Activity>,
    processes: HashMap<ProcessId, Process>,
    memberships: BTreeMap<(ProcessId, CandidateId), ProcessMembership>,
    workflows: HashMap<WorkflowId, Workflow>,
    executions: HashMap<ExecutionId, WorkflowExecution>,
    execution_keys: HashSet<(WorkflowId, String)>,
}

impl Inner {
    fn candidate_mut(&mut self, id: CandidateId) -> Result<&mut Candidate> {
        self.candidates
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("candidate {id}")))
    }

    fn ensure_candidate(&self, id: CandidateId) -> Result<()> {
        if self.candidates.contains_key(&id) {
            Ok(())
        } else {
            Err(Error::NotFound(format!("candidate {id}")))
        }
    }
}

/// Store backed by process memory. Used by tests and by embedders that
/// persist elsewhere.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted_by<T, K: Ord>(mut items: Vec<T>, key: impl Fn(&T) -> K) -> Vec<T> {
    items.sort_by_key(|item| key(item));
    items
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_candidate(&self, candidate: &Candidate, activity: &Activity) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.candidates.contains_key(&candidate.id) {
            return Err(Error::Conflict(format!("candidate {} exists", candidate.id)));
        }
        inner.candidates.insert(candidate.id, candidate.clone());
        inner.activities.push(activity.clone());
        Ok(())
    }

    async fn get_candidate(&self, id: CandidateId) -> Result<Candidate> {
        self.inner
            .read()
            .await
            .candidates
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("candidate {id}")))
    }

    async fn list_candidates(&self) -> Result<Vec<Candidate>> {
        let inner = self.inner.read().await;
        Ok(sorted_by(
            inner.candidates.values().cloned().collect(),
            |c| c.created_at,
        ))
    }

    async fn compare_and_set_status(
        &self,
        id: CandidateId,
        from: CandidateStatus,
        to: CandidateStatus,
        activity: &Activity,
    ) -> Result<StatusWrite> {
        let mut inner = self.inner.write().await;
        let candidate = inner.candidate_mut(id)?;
        if candidate.status != from {
            return Ok(StatusWrite::Mismatch(candidate.status));
        }
        candidate.status = to;
        candidate.updated_at = activity.timestamp;
        if to.counts_as_contact() {
            candidate.last_contacted_at = Some(activity.timestamp);
        }
        inner.activities.push(activity.clone());
        Ok(StatusWrite::Applied)
    }

    async fn update_candidate(
        &self,
        id: CandidateId,
        change: &CandidateChange,
        activity: &Activity,
    ) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let candidate = inner.candidate_mut(id)?;
        if !change.apply(candidate) {
            return Ok(false);
        }
        candidate.updated_at = activity.timestamp;
        inner.activities.push(activity.clone());
        Ok(true)
    }

    async fn append_activity(&self, activity: &Activity) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.ensure_candidate(activity.candidate_id)?;
        inner.activities.push(activity.clone());
        Ok(())
    }

    async fn activities_for(&self, candidate: CandidateId) -> Result<Vec<Activity>> {
        let inner = self.inner.read().await;
        Ok(inner
            .activities
            .iter()
            .filter(|a| a.candidate_id == candidate)
            .cloned()
            .collect())
    }

    async fn activities_after(&self, after: u64, limit: usize) -> Result<Vec<(u64, Activity)>> {
        let inner = self.inner.read().await;
        let skip = usize::try_from(after).unwrap_or(usize::MAX);
        Ok(inner
            .activities
            .iter()
            .zip(1u64..)
            .skip(skip)
            .take(limit)
            .map(|(activity, position)| (position, activity.clone()))
            .collect())
    }

    async fn activity_head(&self) -> Result<u64> {
        Ok(self.inner.read().await.activities.len() as u64)
    }

    async fn latest_status_change(
        &self,
        candidate: CandidateId,
        to: CandidateStatus,
    ) -> Result<Option<Activity>> {
        let inner = self.inner.read().await;
        Ok(inner
            .activities
            .iter()
            .rev()
            .find(|a| {
                a.candidate_id == candidate
                    && matches!(a.kind, ActivityKind::StatusChanged { to: t, .. } if t == to)
            })
            .cloned())
    }

    async fn insert_process(&self, process: &Process) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.processes.contains_key(&process.id) {
            return Err(Error::Conflict(format!("process {} exists", process.id)));
        }
        inner.processes.insert(process.id, process.clone());
        Ok(())
    }

    async fn get_process(&self, id: ProcessId) -> Result<Process> {
        self.inner
            .read()
            .await
            .processes
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("process {id}")))
    }

    async fn list_processes(&self) -> Result<Vec<Process>> {
        let inner = self.inner.read().await;
        Ok(sorted_by(
            inner.processes.values().cloned().collect(),
            |p| p.created_at,
        ))
    }

    async fn set_process_state(
        &self,
        id: ProcessId,
        from: ProcessState,
        to: ProcessState,
        at: DateTime<Utc>,
    ) -> Result<Process> {
        let mut inner = self.inner.write().await;
        let process = inner
            .processes
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("process {id}")))?;
        if process.state != from {
            return Err(Error::Conflict(format!(
                "process {id} is {}, expected {from}",
                process.state
            )));
        }
        process.state = to;
        process.updated_at = at;
        Ok(process.clone())
    }

    async fn insert_membership(
        &self,
        membership: &ProcessMembership,
        activity: &Activity,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.ensure_candidate(membership.candidate_id)?;
        let key = (membership.process_id, membership.candidate_id);
        if inner.memberships.contains_key(&key) {
            return Err(Error::AlreadyMember {
                process: membership.process_id.to_string(),
                candidate: membership.candidate_id.to_string(),
            });
        }
        inner.memberships.insert(key, membership.clone());
        inner.activities.push(activity.clone());
        Ok(())
    }

    async fn get_membership(
        &self,
        process: ProcessId,
        candidate: CandidateId,
    ) -> Result<Option<ProcessMembership>> {
        Ok(self
            .inner
            .read()
            .await
            .memberships
            .get(&(process, candidate))
            .cloned())
    }

    async fn move_membership(
        &self,
        process: ProcessId,
        candidate: CandidateId,
        from: &StageId,
        to: &StageId,
        activity: &Activity,
    ) -> Result<ProcessMembership> {
        let mut inner = self.inner.write().await;
        let membership = inner
            .memberships
            .get_mut(&(process, candidate))
            .ok_or_else(|| {
                Error::NotFound(format!("candidate {candidate} in process {process}"))
            })?;
        if &membership.stage_id != from {
            return Err(Error::Conflict(format!(
                "candidate {candidate} is in stage {}, expected {from}",
                membership.stage_id
            )));
        }
        membership.stage_id = to.clone();
        membership.entered_stage_at = activity.timestamp;
        let moved = membership.clone();
        inner.activities.push(activity.clone());
        Ok(moved)
    }

    async fn remove_membership(
        &self,
        process: ProcessId,
        candidate: CandidateId,
        activity: &Activity,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner
            .memberships
            .remove(&(process, candidate))
            .ok_or_else(|| {
                Error::NotFound(format!("candidate {candidate} in process {process}"))
            })?;
        inner.activities.push(activity.clone());
        Ok(())
    }

    async fn memberships_for_process(&self, process: ProcessId) -> Result<Vec<ProcessMembership>> {
        let inner = self.inner.read().await;
        Ok(sorted_by(
            inner
                .memberships
                .values()
                .filter(|m| m.process_id == process)
                .cloned()
                .collect(),
            |m| m.added_at,
        ))
    }

    async fn memberships_for_candidate(
        &self,
        candidate: CandidateId,
    ) -> Result<Vec<ProcessMembership>> {
        let inner = self.inner.read().await;
        Ok(sorted_by(
            inner
                .memberships
                .values()
                .filter(|m| m.candidate_id == candidate)
                .cloned()
                .collect(),
            |m| m.added_at,
        ))
    }

    async fn list_memberships(&self) -> Result<Vec<ProcessMembership>> {
        Ok(self.inner.read().await.memberships.values().cloned().collect())
    }

    async fn insert_workflow(&self, workflow: &Workflow) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.workflows.contains_key(&workflow.id) {
            return Err(Error::Conflict(format!("workflow {} exists", workflow.id)));
        }
        inner.workflows.insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn get_workflow(&self, id: WorkflowId) -> Result<Workflow> {
        self.inner
            .read()
            .await
            .workflows
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("workflow {id}")))
    }

    async fn list_workflows(&self) -> Result<Vec<Workflow>> {
        let inner = self.inner.read().await;
        Ok(sorted_by(
            inner.workflows.values().cloned().collect(),
            |w| w.created_at,
        ))
    }

    async fn update_workflow(&self, workflow: &Workflow) -> Result<()> {
        let mut inner = self.inner.write().await;
        let slot = inner
            .workflows
            .get_mut(&workflow.id)
            .ok_or_else(|| Error::NotFound(format!("workflow {}", workflow.id)))?;
        *slot = workflow.clone();
        Ok(())
    }

    async fn insert_execution(&self, execution: &WorkflowExecution) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let key = (execution.workflow_id, execution.trigger_key.clone());
        if !inner.execution_keys.insert(key) {
            return Ok(false);
        }
        inner.executions.insert(execution.id, execution.clone());
        Ok(true)
    }

    async fn get_execution(&self, id: ExecutionId) -> Result<WorkflowExecution> {
        self.inner
            .read()
            .await
            .executions
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("execution {id}")))
    }

    async fn save_execution(
        &self,
        execution: &WorkflowExecution,
        expected: ExecutionState,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let slot = inner
            .executions
            .get_mut(&execution.id)
            .ok_or_else(|| Error::NotFound(format!("execution {}", execution.id)))?;
        if slot.state != expected {
            return Err(Error::Conflict(format!(
                "execution {} is {}, expected {expected}",
                execution.id, slot.state
            )));
        }
        *slot = execution.clone();
        Ok(())
    }

    async fn count_executions(
        &self,
        workflow: WorkflowId,
        candidate: Option<CandidateId>,
        since: Option<DateTime<Utc>>,
    ) -> Result<u32> {
        let inner = self.inner.read().await;
        let count = inner
            .executions
            .values()
            .filter(|e| e.workflow_id == workflow && e.state.counts_toward_limits())
            .filter(|e| candidate.is_none_or(|c| e.candidate_id == c))
            .filter(|e| since.is_none_or(|t| e.created_at >= t))
            .count();
        Ok(count as u32)
    }

    async fn due_executions(&self, now: DateTime<Utc>) -> Result<Vec<WorkflowExecution>> {
        let inner = self.inner.read().await;
        Ok(sorted_by(
            inner
                .executions
                .values()
                .filter(|e| e.is_due(now))
                .cloned()
                .collect(),
            |e| (e.resume_at, e.created_at),
        ))
    }

    async fn executions_for_workflow(
        &self,
        workflow: WorkflowId,
    ) -> Result<Vec<WorkflowExecution>> {
        let inner = self.inner.read().await;
        Ok(sorted_by(
            inner
                .executions
                .values()
                .filter(|e| e.workflow_id == workflow)
                .cloned()
                .collect(),
            |e| e.created_at,
        ))
    }

    async fn executions_for_candidate(
        &self,
        candidate: CandidateId,
    ) -> Result<Vec<WorkflowExecution>> {
        let inner = self.inner.read().await;
        Ok(sorted_by(
            inner
                .executions
                .values()
                .filter(|e| e.candidate_id == candidate)
                .cloned()
                .collect(),
            |e| e.created_at,
        ))
    }
}
