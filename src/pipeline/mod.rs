//! The candidate pipeline: status state machine, process stages, SLA views.
//!
//! All candidate and process mutations go through [`Pipeline`]. It validates
//! the request, hands the store a conditional write together with the
//! activity describing it, then publishes the activity once committed.

pub mod sla;
pub mod stage_graph;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use tracing::{info, warn};

use crate::activity::ActivityLog;
use crate::error::{Error, Result};
use crate::model::*;
use crate::store::{CandidateChange, MemoryStore, StatusWrite, Store};
use crate::telemetry::metrics;

pub use sla::{SlaEntry, SlaStatus};
pub use stage_graph::StageGraph;

/// Who is writing, and how deep in a workflow cascade the write is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub actor: Actor,
    pub depth: u32,
}

impl Origin {
    pub fn workflow(id: WorkflowId, depth: u32) -> Self {
        Self {
            actor: Actor::Workflow(id),
            depth,
        }
    }

    pub fn system() -> Self {
        Self::from(Actor::System)
    }
}

impl From<Actor> for Origin {
    fn from(actor: Actor) -> Self {
        Self { actor, depth: 0 }
    }
}

/// What a transition request did.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionResult {
    /// The status changed; this is the activity that was appended.
    Applied(Activity),
    /// The candidate was already in the requested status (a duplicate
    /// request). Nothing was appended; this is the activity that got it there.
    AlreadyApplied(Activity),
}

impl TransitionResult {
    pub fn activity(&self) -> &Activity {
        match self {
            TransitionResult::Applied(a) | TransitionResult::AlreadyApplied(a) => a,
        }
    }

    pub fn into_activity(self) -> Activity {
        match self {
            TransitionResult::Applied(a) | TransitionResult::AlreadyApplied(a) => a,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionResult::Applied(_))
    }
}

#[derive(Clone)]
pub struct Pipeline {
    store: Arc<dyn Store>,
    log: ActivityLog,
}

impl Pipeline {
    pub fn new(store: Arc<dyn Store>) -> Self {
        let log = ActivityLog::new(Arc::clone(&store));
        Self { store, log }
    }

    /// A pipeline over a fresh [`MemoryStore`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn activity_log(&self) -> &ActivityLog {
        &self.log
    }

    fn activity(&self, candidate: CandidateId, origin: &Origin, kind: ActivityKind) -> Activity {
        Activity::new(candidate, origin.actor.clone(), kind).depth(origin.depth)
    }

    // -----------------------------------------------------------------------
    // Candidates
    // -----------------------------------------------------------------------

    /// Intake a candidate in the `New` state.
    pub async fn create_candidate(
        &self,
        new: NewCandidate,
        origin: impl Into<Origin>,
    ) -> Result<Candidate> {
        let origin = origin.into();
        if new.email.trim().is_empty() {
            return Err(Error::Validation("candidate email must not be empty".into()));
        }
        let candidate = new.into_candidate(Utc::now());
        let activity = self
            .activity(
                candidate.id,
                &origin,
                ActivityKind::CandidateCreated {
                    source: candidate.source,
                },
            )
            .at(candidate.created_at);
        self.store.insert_candidate(&candidate, &activity).await?;
        info!(candidate_id = %candidate.id, source = candidate.source.as_str(), "candidate created");
        self.log.publish(activity);
        Ok(candidate)
    }

    pub async fn get_candidate(&self, id: CandidateId) -> Result<Candidate> {
        self.store.get_candidate(id).await
    }

    pub async fn list_candidates(&self) -> Result<Vec<Candidate>> {
        self.store.list_candidates().await
    }

    /// Move a candidate from `from` to `to`.
    ///
    /// Fails with `InvalidTransition` when the table forbids the move and
    /// with `Conflict` when the candidate is no longer in `from`. A repeat of
    /// a transition that already happened is a no-op.
    pub async fn transition(
        &self,
        id: CandidateId,
        from: CandidateStatus,
        to: CandidateStatus,
        origin: impl Into<Origin>,
    ) -> Result<TransitionResult> {
        let origin = origin.into();
        if !from.can_transition_to(to) {
            metrics::transitions_rejected().add(1, &[KeyValue::new("reason", "invalid")]);
            return Err(Error::invalid_transition(from, to));
        }

        let activity = self.activity(id, &origin, ActivityKind::StatusChanged { from, to });
        match self
            .store
            .compare_and_set_status(id, from, to, &activity)
            .await?
        {
            StatusWrite::Applied => {
                metrics::status_transitions().add(
                    1,
                    &[
                        KeyValue::new("from", from.as_str()),
                        KeyValue::new("to", to.as_str()),
                    ],
                );
                info!(candidate_id = %id, %from, %to, actor = %origin.actor, "status changed");
                self.log.publish(activity.clone());
                Ok(TransitionResult::Applied(activity))
            }
            StatusWrite::Mismatch(current) if current == to => {
                let existing = self
                    .store
                    .latest_status_change(id, to)
                    .await?
                    .ok_or_else(|| {
                        Error::Conflict(format!("candidate {id} is {to} without a transition"))
                    })?;
                Ok(TransitionResult::AlreadyApplied(existing))
            }
            StatusWrite::Mismatch(current) => {
                metrics::transitions_rejected().add(1, &[KeyValue::new("reason", "conflict")]);
                warn!(candidate_id = %id, %current, expected = %from, %to, "transition conflict");
                Err(Error::Conflict(format!(
                    "candidate {id} is {current}, expected {from}"
                )))
            }
        }
    }

    /// Move a candidate from whatever status it is in now to `to`.
    pub async fn request_transition(
        &self,
        id: CandidateId,
        to: CandidateStatus,
        origin: impl Into<Origin>,
    ) -> Result<TransitionResult> {
        let candidate = self.store.get_candidate(id).await?;
        if candidate.status == to
            && let Some(existing) = self.store.latest_status_change(id, to).await?
        {
            return Ok(TransitionResult::AlreadyApplied(existing));
        }
        self.transition(id, candidate.status, to, origin).await
    }

    /// Soft delete.
    pub async fn archive(
        &self,
        id: CandidateId,
        origin: impl Into<Origin>,
    ) -> Result<TransitionResult> {
        self.request_transition(id, CandidateStatus::Archived, origin)
            .await
    }

    /// Returns the appended activity, or `None` when the tag was present.
    pub async fn add_tag(
        &self,
        id: CandidateId,
        tag: impl Into<String>,
        origin: impl Into<Origin>,
    ) -> Result<Option<Activity>> {
        let tag = normalize_tag(tag.into())?;
        let origin = origin.into();
        let activity = self.activity(id, &origin, ActivityKind::TagAdded { tag: tag.clone() });
        self.apply_change(id, CandidateChange::AddTag(tag), activity)
            .await
    }

    /// Returns the appended activity, or `None` when the tag was absent.
    pub async fn remove_tag(
        &self,
        id: CandidateId,
        tag: impl Into<String>,
        origin: impl Into<Origin>,
    ) -> Result<Option<Activity>> {
        let tag = normalize_tag(tag.into())?;
        let origin = origin.into();
        let activity = self.activity(id, &origin, ActivityKind::TagRemoved { tag: tag.clone() });
        self.apply_change(id, CandidateChange::RemoveTag(tag), activity)
            .await
    }

    pub async fn set_score(
        &self,
        id: CandidateId,
        criterion: impl Into<String>,
        score: f64,
        origin: impl Into<Origin>,
    ) -> Result<Option<Activity>> {
        if !score.is_finite() {
            return Err(Error::Validation(format!("score must be finite, got {score}")));
        }
        let criterion = criterion.into();
        let origin = origin.into();
        let previous = self
            .store
            .get_candidate(id)
            .await?
            .scores
            .get(&criterion)
            .copied();
        let activity = self.activity(
            id,
            &origin,
            ActivityKind::ScoreUpdated {
                criterion: criterion.clone(),
                score,
                previous,
            },
        );
        self.apply_change(id, CandidateChange::SetScore { criterion, score }, activity)
            .await
    }

    pub async fn assign(
        &self,
        id: CandidateId,
        user: UserId,
        origin: impl Into<Origin>,
    ) -> Result<Option<Activity>> {
        let origin = origin.into();
        let activity = self.activity(id, &origin, ActivityKind::UserAssigned { user: user.clone() });
        self.apply_change(id, CandidateChange::Assign(user), activity)
            .await
    }

    async fn apply_change(
        &self,
        id: CandidateId,
        change: CandidateChange,
        activity: Activity,
    ) -> Result<Option<Activity>> {
        if self.store.update_candidate(id, &change, &activity).await? {
            info!(candidate_id = %id, kind = activity.kind.name(), "candidate updated");
            self.log.publish(activity.clone());
            Ok(Some(activity))
        } else {
            Ok(None)
        }
    }

    pub async fn add_note(
        &self,
        id: CandidateId,
        text: impl Into<String>,
        origin: impl Into<Origin>,
    ) -> Result<Activity> {
        let origin = origin.into();
        self.record(id, &origin, ActivityKind::NoteAdded { text: text.into() })
            .await
    }

    pub async fn schedule_interview(
        &self,
        id: CandidateId,
        scheduled_at: DateTime<Utc>,
        interviewer: Option<UserId>,
        origin: impl Into<Origin>,
    ) -> Result<Activity> {
        let origin = origin.into();
        self.record(
            id,
            &origin,
            ActivityKind::InterviewScheduled {
                scheduled_at,
                interviewer,
            },
        )
        .await
    }

    /// Append a standalone activity (one that changes no candidate field).
    pub(crate) async fn record(
        &self,
        id: CandidateId,
        origin: &Origin,
        kind: ActivityKind,
    ) -> Result<Activity> {
        let activity = self.activity(id, origin, kind);
        self.log.append(activity.clone()).await?;
        Ok(activity)
    }

    pub async fn activities(&self, id: CandidateId) -> Result<Vec<Activity>> {
        self.store.get_candidate(id).await?;
        self.log.for_candidate(id).await
    }

    pub async fn memberships(&self, id: CandidateId) -> Result<Vec<ProcessMembership>> {
        self.store.memberships_for_candidate(id).await
    }

    // -----------------------------------------------------------------------
    // Processes
    // -----------------------------------------------------------------------

    pub async fn create_process(&self, new: NewProcess) -> Result<Process> {
        let process = new.into_process(Utc::now())?;
        self.store.insert_process(&process).await?;
        info!(process_id = %process.id, name = %process.name, stages = process.stages.len(), "process created");
        Ok(process)
    }

    pub async fn get_process(&self, id: ProcessId) -> Result<Process> {
        self.store.get_process(id).await
    }

    pub async fn list_processes(&self) -> Result<Vec<Process>> {
        self.store.list_processes().await
    }

    pub async fn activate_process(&self, id: ProcessId) -> Result<Process> {
        self.set_process_state(id, ProcessState::Active).await
    }

    pub async fn complete_process(&self, id: ProcessId) -> Result<Process> {
        self.set_process_state(id, ProcessState::Completed).await
    }

    pub async fn archive_process(&self, id: ProcessId) -> Result<Process> {
        self.set_process_state(id, ProcessState::Archived).await
    }

    async fn set_process_state(&self, id: ProcessId, to: ProcessState) -> Result<Process> {
        let process = self.store.get_process(id).await?;
        if !process.state.can_transition_to(to) {
            return Err(Error::invalid_transition(process.state, to));
        }
        let updated = self
            .store
            .set_process_state(id, process.state, to, Utc::now())
            .await?;
        info!(process_id = %id, from = %process.state, %to, "process state changed");
        Ok(updated)
    }

    /// Stages of a process in pipeline order.
    pub async fn stages_for(&self, id: ProcessId) -> Result<Vec<Stage>> {
        Ok(self.store.get_process(id).await?.stages)
    }

    pub async fn is_legal_transition(
        &self,
        id: ProcessId,
        from: &StageId,
        to: &StageId,
    ) -> Result<bool> {
        let process = self.store.get_process(id).await?;
        Ok(StageGraph::new(&process).is_legal(from, to))
    }

    async fn open_process(&self, id: ProcessId) -> Result<Process> {
        let process = self.store.get_process(id).await?;
        if !process.is_open() {
            return Err(Error::ProcessClosed {
                id: id.to_string(),
                state: process.state.to_string(),
            });
        }
        Ok(process)
    }

    pub async fn add_candidate_to_process(
        &self,
        process_id: ProcessId,
        candidate_id: CandidateId,
        stage_id: StageId,
        origin: impl Into<Origin>,
    ) -> Result<ProcessMembership> {
        let origin = origin.into();
        let process = self.open_process(process_id).await?;
        self.store.get_candidate(candidate_id).await?;
        if !process.has_stage(&stage_id) {
            return Err(Error::IllegalStage(format!(
                "stage {stage_id} does not exist in process {process_id}"
            )));
        }

        let activity = self.activity(
            candidate_id,
            &origin,
            ActivityKind::AddedToProcess {
                process_id,
                stage_id: stage_id.clone(),
            },
        );
        let membership = ProcessMembership {
            process_id,
            candidate_id,
            stage_id,
            entered_stage_at: activity.timestamp,
            added_at: activity.timestamp,
        };
        self.store.insert_membership(&membership, &activity).await?;
        info!(%process_id, %candidate_id, stage = %membership.stage_id, "candidate added to process");
        self.log.publish(activity);
        Ok(membership)
    }

    /// Move a member to another stage of the process. Moving to the stage it
    /// is already in changes nothing.
    pub async fn move_stage(
        &self,
        process_id: ProcessId,
        candidate_id: CandidateId,
        to: StageId,
        origin: impl Into<Origin>,
    ) -> Result<ProcessMembership> {
        let origin = origin.into();
        let process = self.open_process(process_id).await?;
        let membership = self
            .store
            .get_membership(process_id, candidate_id)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!("candidate {candidate_id} in process {process_id}"))
            })?;
        if !process.has_stage(&to) {
            return Err(Error::IllegalStage(format!(
                "stage {to} does not exist in process {process_id}"
            )));
        }
        if membership.stage_id == to {
            return Ok(membership);
        }
        let graph = StageGraph::new(&process);
        if !graph.is_legal(&membership.stage_id, &to) {
            let allowed: Vec<_> = graph
                .targets(&membership.stage_id)
                .iter()
                .map(|stage| stage.id.to_string())
                .collect();
            return Err(Error::IllegalStage(format!(
                "process {process_id} does not allow {} -> {to} (allowed: {})",
                membership.stage_id,
                if allowed.is_empty() { "none".to_string() } else { allowed.join(", ") }
            )));
        }

        let activity = self.activity(
            candidate_id,
            &origin,
            ActivityKind::StageChanged {
                process_id,
                from: membership.stage_id.clone(),
                to: to.clone(),
            },
        );
        let moved = self
            .store
            .move_membership(process_id, candidate_id, &membership.stage_id, &to, &activity)
            .await?;
        metrics::stage_moves().add(
            1,
            &[
                KeyValue::new("process", process.name.clone()),
                KeyValue::new("to", to.to_string()),
            ],
        );
        info!(%process_id, %candidate_id, from = %membership.stage_id, %to, "stage changed");
        self.log.publish(activity);
        Ok(moved)
    }

    pub async fn remove_from_process(
        &self,
        process_id: ProcessId,
        candidate_id: CandidateId,
        origin: impl Into<Origin>,
    ) -> Result<()> {
        let origin = origin.into();
        self.open_process(process_id).await?;
        let membership = self
            .store
            .get_membership(process_id, candidate_id)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!("candidate {candidate_id} in process {process_id}"))
            })?;
        let activity = self.activity(
            candidate_id,
            &origin,
            ActivityKind::RemovedFromProcess {
                process_id,
                stage_id: membership.stage_id,
            },
        );
        self.store
            .remove_membership(process_id, candidate_id, &activity)
            .await?;
        info!(%process_id, %candidate_id, "candidate removed from process");
        self.log.publish(activity);
        Ok(())
    }

    pub async fn process_members(&self, id: ProcessId) -> Result<Vec<ProcessMembership>> {
        self.store.get_process(id).await?;
        self.store.memberships_for_process(id).await
    }

    /// Per-stage counts, recomputed from memberships on every call.
    pub async fn metrics(&self, id: ProcessId) -> Result<StageMetrics> {
        let process = self.store.get_process(id).await?;
        let memberships = self.store.memberships_for_process(id).await?;
        Ok(StageMetrics::compute(&process, &memberships))
    }

    // -----------------------------------------------------------------------
    // SLA
    // -----------------------------------------------------------------------

    pub async fn sla_status(&self, candidate: CandidateId, process: ProcessId) -> Result<SlaStatus> {
        self.sla_status_at(candidate, process, Utc::now()).await
    }

    pub async fn sla_status_at(
        &self,
        candidate: CandidateId,
        process_id: ProcessId,
        now: DateTime<Utc>,
    ) -> Result<SlaStatus> {
        let process = self.store.get_process(process_id).await?;
        let membership = self
            .store
            .get_membership(process_id, candidate)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!("candidate {candidate} in process {process_id}"))
            })?;
        let stage = process.stage(&membership.stage_id).ok_or_else(|| {
            Error::NotFound(format!(
                "stage {} in process {process_id}",
                membership.stage_id
            ))
        })?;
        Ok(sla::status(membership.entered_stage_at, now, stage.sla_hours))
    }

    /// SLA status of every member of a process.
    pub async fn sla_report(&self, process_id: ProcessId, now: DateTime<Utc>) -> Result<Vec<SlaEntry>> {
        let process = self.store.get_process(process_id).await?;
        let memberships = self.store.memberships_for_process(process_id).await?;
        Ok(memberships
            .into_iter()
            .map(|m| {
                let sla_hours = process.stage(&m.stage_id).and_then(|s| s.sla_hours);
                SlaEntry {
                    status: sla::status(m.entered_stage_at, now, sla_hours),
                    candidate_id: m.candidate_id,
                    stage_id: m.stage_id,
                    entered_stage_at: m.entered_stage_at,
                    sla_hours,
                }
            })
            .collect())
    }
}

fn normalize_tag(tag: String) -> Result<String> {
    let tag = tag.trim().to_string();
    if tag.is_empty() {
        return Err(Error::Validation("tag must not be empty".into()));
    }
    Ok(tag)
}
