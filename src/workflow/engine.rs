//! Workflow rule engine: trigger → guard → limits → ordered actions.
//!
//! An execution is created per (workflow, trigger key) and carries its own
//! copy of the steps. Running it is idempotent: it is claimed by a
//! compare-and-set from pending to running, runs every step that is due, and
//! either finishes or parks itself as pending with a `resume_at`.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use opentelemetry::KeyValue;
use tokio::sync::Mutex;
use tracing::{Instrument, debug, error, info, warn};

use super::effects::{ActionError, Effects, Notification, WebhookPayload};
use super::trigger::{match_activity, passes_filter};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::model::workflow::{NotificationChannel, Recipient};
use crate::model::*;
use crate::pipeline::{Origin, Pipeline};
use crate::store::Store;
use crate::telemetry::metrics;
use crate::telemetry::pipeline::{record_state_transition, start_execution_span};

/// Everything about a firing that does not come from the workflow itself.
#[derive(Debug, Clone)]
pub(crate) struct Firing {
    pub key: String,
    pub activity_id: Option<ActivityId>,
    pub anchor_at: DateTime<Utc>,
    pub depth: u32,
}

#[derive(Clone)]
pub struct WorkflowEngine {
    pipeline: Pipeline,
    effects: Arc<dyn Effects>,
    config: EngineConfig,
    /// Limit checks and execution inserts happen under this lock so two
    /// concurrent firings cannot both take the last slot.
    fire_lock: Arc<Mutex<()>>,
}

impl WorkflowEngine {
    pub fn new(pipeline: Pipeline, effects: Arc<dyn Effects>, config: EngineConfig) -> Self {
        Self {
            pipeline,
            effects,
            config,
            fire_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn store(&self) -> &Arc<dyn Store> {
        self.pipeline.store()
    }

    // -----------------------------------------------------------------------
    // Definitions
    // -----------------------------------------------------------------------

    pub async fn register_workflow(&self, new: NewWorkflow) -> Result<WorkflowId> {
        let workflow = new.into_workflow(Utc::now())?;
        self.store().insert_workflow(&workflow).await?;
        info!(workflow_id = %workflow.id, name = %workflow.name, trigger = workflow.trigger.name(), "workflow registered");
        Ok(workflow.id)
    }

    /// Replace a workflow's definition. In-flight executions keep the steps
    /// they were created with.
    pub async fn update_workflow(&self, id: WorkflowId, new: NewWorkflow) -> Result<Workflow> {
        new.validate()?;
        let current = self.store().get_workflow(id).await?;
        let workflow = Workflow {
            id,
            name: new.name,
            description: new.description,
            active: new.active,
            trigger: new.trigger,
            filter: new.filter,
            steps: new.steps,
            limits: new.limits,
            failure_policy: new.failure_policy,
            version: current.version + 1,
            created_at: current.created_at,
            updated_at: Utc::now(),
        };
        self.store().update_workflow(&workflow).await?;
        info!(workflow_id = %id, version = workflow.version, "workflow updated");
        Ok(workflow)
    }

    pub async fn set_workflow_active(&self, id: WorkflowId, active: bool) -> Result<Workflow> {
        let mut workflow = self.store().get_workflow(id).await?;
        if workflow.active == active {
            return Ok(workflow);
        }
        workflow.active = active;
        workflow.version += 1;
        workflow.updated_at = Utc::now();
        self.store().update_workflow(&workflow).await?;
        info!(workflow_id = %id, active, "workflow toggled");
        Ok(workflow)
    }

    pub async fn get_workflow(&self, id: WorkflowId) -> Result<Workflow> {
        self.store().get_workflow(id).await
    }

    pub async fn list_workflows(&self) -> Result<Vec<Workflow>> {
        self.store().list_workflows().await
    }

    pub async fn executions_for_workflow(&self, id: WorkflowId) -> Result<Vec<WorkflowExecution>> {
        self.store().executions_for_workflow(id).await
    }

    pub async fn executions_for_candidate(
        &self,
        id: CandidateId,
    ) -> Result<Vec<WorkflowExecution>> {
        self.store().executions_for_candidate(id).await
    }

    pub async fn get_execution(&self, id: ExecutionId) -> Result<WorkflowExecution> {
        self.store().get_execution(id).await
    }

    // -----------------------------------------------------------------------
    // Evaluation
    // -----------------------------------------------------------------------

    pub async fn evaluate_event(&self, activity: &Activity) -> Result<Vec<WorkflowExecution>> {
        self.evaluate_event_at(activity, Utc::now()).await
    }

    /// Fire every active workflow whose trigger matches `activity`. Returns
    /// the executions created (skipped ones included); an activity seen
    /// before yields nothing.
    pub async fn evaluate_event_at(
        &self,
        activity: &Activity,
        now: DateTime<Utc>,
    ) -> Result<Vec<WorkflowExecution>> {
        if activity.depth >= self.config.max_cascade_depth {
            warn!(
                activity_id = %activity.id,
                depth = activity.depth,
                "cascade depth reached, not evaluating workflows"
            );
            return Ok(Vec::new());
        }

        let workflows = self.store().list_workflows().await?;
        let mut fired = Vec::new();
        for workflow in workflows.iter().filter(|w| w.active) {
            let Some(anchor_at) = match_activity(&workflow.trigger, activity) else {
                continue;
            };
            let firing = Firing {
                key: activity.id.to_string(),
                activity_id: Some(activity.id),
                anchor_at,
                depth: activity.depth,
            };
            match self.fire(workflow, activity.candidate_id, firing, now).await {
                Ok(Some(execution)) => fired.push(execution),
                Ok(None) => {
                    debug!(workflow_id = %workflow.id, activity_id = %activity.id, "already fired")
                }
                Err(e) => {
                    error!(workflow_id = %workflow.id, activity_id = %activity.id, "workflow evaluation failed: {e}")
                }
            }
        }
        Ok(fired)
    }

    /// Fire a manual workflow for one candidate.
    pub async fn fire_manual(
        &self,
        workflow_id: WorkflowId,
        candidate_id: CandidateId,
        actor: Actor,
    ) -> Result<WorkflowExecution> {
        let workflow = self.store().get_workflow(workflow_id).await?;
        if workflow.trigger != Trigger::Manual {
            return Err(Error::Validation(format!(
                "workflow {} has a {} trigger, not manual",
                workflow.name,
                workflow.trigger.name()
            )));
        }
        if !workflow.active {
            return Err(Error::Validation(format!(
                "workflow {} is inactive",
                workflow.name
            )));
        }
        let now = Utc::now();
        info!(%workflow_id, %candidate_id, %actor, "manual workflow fired");
        let firing = Firing {
            key: format!("manual:{}", ExecutionId::new()),
            activity_id: None,
            anchor_at: now,
            depth: 0,
        };
        self.fire(&workflow, candidate_id, firing, now)
            .await?
            .ok_or_else(|| Error::Conflict(format!("manual firing of {workflow_id} collided")))
    }

    /// Create an execution for `candidate` unless one exists for the key.
    /// Guard and limit failures still produce a (skipped) execution.
    pub(crate) async fn fire(
        &self,
        workflow: &Workflow,
        candidate_id: CandidateId,
        firing: Firing,
        now: DateTime<Utc>,
    ) -> Result<Option<WorkflowExecution>> {
        let candidate = self.store().get_candidate(candidate_id).await?;

        let mut execution = WorkflowExecution {
            id: ExecutionId::new(),
            workflow_id: workflow.id,
            workflow_version: workflow.version,
            candidate_id,
            trigger_key: firing.key,
            trigger_activity_id: firing.activity_id,
            state: ExecutionState::Pending,
            steps: workflow.steps.clone(),
            results: Vec::new(),
            next_step: 0,
            anchor_at: firing.anchor_at,
            resume_at: None,
            skip_reason: None,
            depth: firing.depth,
            created_at: now,
            updated_at: now,
            finished_at: None,
        };

        {
            let _guard = self.fire_lock.lock().await;
            let skip = if !passes_filter(&workflow.filter, &candidate) {
                Some(SkipReason::GuardFailed)
            } else if self.rate_limited(workflow, candidate_id, now).await? {
                Some(SkipReason::RateLimited)
            } else {
                None
            };
            if let Some(reason) = skip {
                execution.state = ExecutionState::Skipped;
                execution.skip_reason = Some(reason);
                execution.finished_at = Some(now);
            }
            if !self.store().insert_execution(&execution).await? {
                return Ok(None);
            }
        }

        if let Some(reason) = execution.skip_reason {
            info!(
                workflow = %workflow.name,
                execution_id = %execution.id,
                %candidate_id,
                reason = ?reason,
                "workflow skipped"
            );
            record_outcome(&workflow.name, execution.state);
            return Ok(Some(execution));
        }

        self.pipeline
            .record(
                candidate_id,
                &Origin::workflow(workflow.id, firing.depth),
                ActivityKind::WorkflowFired {
                    workflow_id: workflow.id,
                    execution_id: execution.id,
                },
            )
            .await?;
        info!(workflow = %workflow.name, execution_id = %execution.id, %candidate_id, "workflow fired");

        self.run_execution(execution.id, now).await.map(Some)
    }

    async fn rate_limited(
        &self,
        workflow: &Workflow,
        candidate: CandidateId,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        if let Some(max) = workflow.limits.max_executions_per_candidate {
            let count = self
                .store()
                .count_executions(workflow.id, Some(candidate), None)
                .await?;
            if count >= max {
                return Ok(true);
            }
        }
        if let Some(max) = workflow.limits.max_executions_per_day {
            let since = now - Duration::hours(24);
            let count = self
                .store()
                .count_executions(workflow.id, None, Some(since))
                .await?;
            if count >= max {
                return Ok(true);
            }
        }
        Ok(false)
    }

    // -----------------------------------------------------------------------
    // Running
    // -----------------------------------------------------------------------

    /// Run every pending execution whose resume time has passed.
    pub async fn run_due(&self, now: DateTime<Utc>) -> Result<Vec<WorkflowExecution>> {
        let due = self.store().due_executions(now).await?;
        let mut ran = Vec::with_capacity(due.len());
        for execution in due {
            match self.run_execution(execution.id, now).await {
                Ok(execution) => ran.push(execution),
                Err(e) => error!(execution_id = %execution.id, "deferred execution failed: {e}"),
            }
        }
        Ok(ran)
    }

    /// Run whatever is due of one execution. Executions that are not pending
    /// or not yet due come back unchanged, so re-delivery is harmless.
    pub async fn run_execution(
        &self,
        id: ExecutionId,
        now: DateTime<Utc>,
    ) -> Result<WorkflowExecution> {
        let mut execution = self.store().get_execution(id).await?;
        if !execution.is_due(now) {
            return Ok(execution);
        }

        execution.state = ExecutionState::Running;
        execution.updated_at = now;
        match self
            .store()
            .save_execution(&execution, ExecutionState::Pending)
            .await
        {
            Ok(()) => {}
            Err(Error::Conflict(_)) => {
                debug!(execution_id = %id, "execution claimed elsewhere");
                return self.store().get_execution(id).await;
            }
            Err(e) => return Err(e),
        }

        let workflow = match self.store().get_workflow(execution.workflow_id).await {
            Ok(workflow) => Some(workflow),
            Err(Error::NotFound(_)) => None,
            Err(e) => return Err(e),
        };
        let name = workflow
            .as_ref()
            .map_or_else(|| execution.workflow_id.to_string(), |w| w.name.clone());
        let span = start_execution_span(&name, execution.id, execution.candidate_id);
        record_state_transition(&span, "pending", "running");

        let failure_policy = match workflow {
            Some(w) if w.active => w.failure_policy,
            _ => {
                execution.state = ExecutionState::Skipped;
                execution.skip_reason = Some(SkipReason::WorkflowInactive);
                execution.finished_at = Some(now);
                execution.resume_at = None;
                self.store()
                    .save_execution(&execution, ExecutionState::Running)
                    .await?;
                record_state_transition(&span, "running", "skipped");
                record_outcome(&name, execution.state);
                return Ok(execution);
            }
        };

        self.run_steps(&mut execution, failure_policy, now)
            .instrument(span.clone())
            .await?;

        if execution.state == ExecutionState::Pending {
            record_state_transition(&span, "running", "pending");
            span.in_scope(|| {
                debug!(resume_at = ?execution.resume_at, step = execution.next_step, "execution paused");
            });
        } else {
            record_state_transition(&span, "running", execution.state.as_str());
        }
        self.store()
            .save_execution(&execution, ExecutionState::Running)
            .await?;
        record_outcome(&name, execution.state);
        Ok(execution)
    }

    /// Advance through due steps. Leaves the execution either pending (with a
    /// resume time) or in its terminal state.
    async fn run_steps(
        &self,
        execution: &mut WorkflowExecution,
        policy: FailurePolicy,
        now: DateTime<Utc>,
    ) -> Result<()> {
        while execution.next_step < execution.steps.len() {
            let index = execution.next_step;
            let step = execution.steps[index].clone();
            let outcome = match execution.step_due_at(index) {
                Some(due) if due > now => {
                    execution.state = ExecutionState::Pending;
                    execution.resume_at = Some(due);
                    execution.updated_at = now;
                    return Ok(());
                }
                Some(_) => self.perform(execution, &step.action, now).await,
                None => Err(ActionError::permanent(format!(
                    "delay of {} minutes is out of range",
                    step.delay_minutes
                ))),
            };
            if execution.current_result_mut().is_none() {
                execution.results.push(ActionResult {
                    step: index,
                    action: step.action.name().to_string(),
                    status: ActionStatus::Retrying,
                    attempts: 0,
                    error: None,
                    finished_at: None,
                });
            }
            let max_attempts = self.config.max_attempts;
            let Some(result) = execution.current_result_mut() else {
                return Err(Error::Other(format!("missing result slot for step {index}")));
            };
            result.attempts += 1;
            let attempts = result.attempts;

            match outcome {
                Ok(()) => {
                    result.status = ActionStatus::Succeeded;
                    result.error = None;
                    result.finished_at = Some(now);
                    record_action(step.action.name(), "succeeded");
                    execution.next_step += 1;
                    execution.resume_at = None;
                }
                Err(e) if e.retryable && attempts < max_attempts => {
                    result.status = ActionStatus::Retrying;
                    result.error = Some(e.message.clone());
                    record_action(step.action.name(), "retrying");
                    let backoff = Duration::from_std(self.config.retry_backoff * attempts)
                        .unwrap_or_else(|_| Duration::seconds(30));
                    warn!(step = index, attempts, error = %e, "action failed, will retry");
                    execution.state = ExecutionState::Pending;
                    execution.resume_at = Some(now + backoff);
                    execution.updated_at = now;
                    return Ok(());
                }
                Err(e) => {
                    result.status = ActionStatus::Failed;
                    result.error = Some(e.message.clone());
                    result.finished_at = Some(now);
                    record_action(step.action.name(), "failed");
                    warn!(step = index, attempts, error = %e, "action failed");
                    execution.next_step += 1;
                    execution.resume_at = None;
                    if policy == FailurePolicy::StopOnFailure {
                        break;
                    }
                }
            }
        }

        execution.state = execution.final_state();
        execution.finished_at = Some(now);
        execution.updated_at = now;
        Ok(())
    }

    /// Carry out one action for the execution's candidate.
    async fn perform(
        &self,
        execution: &WorkflowExecution,
        action: &Action,
        now: DateTime<Utc>,
    ) -> std::result::Result<(), ActionError> {
        let candidate_id = execution.candidate_id;
        let origin = Origin::workflow(execution.workflow_id, execution.depth + 1);
        match action {
            Action::SendNotification {
                channel,
                recipient,
                template,
            } => {
                let candidate = self.pipeline.get_candidate(candidate_id).await?;
                let notification = Notification {
                    candidate_id,
                    channel: *channel,
                    address: resolve_address(&candidate, *channel, recipient)?,
                    template: template.clone(),
                };
                self.effects.send_notification(&notification).await?;
                self.pipeline
                    .record(
                        candidate_id,
                        &origin,
                        ActivityKind::NotificationSent {
                            channel: *channel,
                            recipient: recipient.clone(),
                            template: template.clone(),
                        },
                    )
                    .await?;
            }
            Action::AddTag { tag } => {
                self.pipeline.add_tag(candidate_id, tag, origin).await?;
            }
            Action::RemoveTag { tag } => {
                self.pipeline.remove_tag(candidate_id, tag, origin).await?;
            }
            Action::ChangeStatus { to } => {
                self.pipeline
                    .request_transition(candidate_id, *to, origin)
                    .await?;
            }
            Action::AssignUser { user } => {
                self.pipeline
                    .assign(candidate_id, user.clone(), origin)
                    .await?;
            }
            Action::CreateTask {
                title,
                assignee,
                due_in_hours,
            } => {
                let due_at = due_in_hours
                    .and_then(|h| now.checked_add_signed(Duration::hours(i64::from(h))));
                self.pipeline
                    .record(
                        candidate_id,
                        &origin,
                        ActivityKind::TaskCreated {
                            title: title.clone(),
                            assignee: assignee.clone(),
                            due_at,
                        },
                    )
                    .await?;
            }
            Action::CallWebhook { url } => {
                let candidate = self.pipeline.get_candidate(candidate_id).await?;
                let payload = WebhookPayload {
                    workflow_id: execution.workflow_id,
                    execution_id: execution.id,
                    candidate_id,
                    candidate: serde_json::to_value(&candidate)
                        .map_err(|e| ActionError::permanent(e.to_string()))?,
                };
                let status = self.effects.call_webhook(url, &payload).await?;
                self.pipeline
                    .record(
                        candidate_id,
                        &origin,
                        ActivityKind::WebhookCalled {
                            url: url.clone(),
                            status,
                        },
                    )
                    .await?;
            }
        }
        Ok(())
    }

    /// Cancel a pending execution.
    pub async fn revoke(&self, id: ExecutionId, actor: Actor) -> Result<WorkflowExecution> {
        let mut execution = self.store().get_execution(id).await?;
        let from = execution.state;
        if !from.can_transition_to(ExecutionState::Cancelled) {
            return Err(Error::invalid_transition(from, ExecutionState::Cancelled));
        }
        let now = Utc::now();
        execution.state = ExecutionState::Cancelled;
        execution.resume_at = None;
        execution.finished_at = Some(now);
        execution.updated_at = now;
        self.store().save_execution(&execution, from).await?;
        info!(execution_id = %id, %actor, "execution revoked");
        Ok(execution)
    }
}

fn resolve_address(
    candidate: &Candidate,
    channel: NotificationChannel,
    recipient: &Recipient,
) -> std::result::Result<String, ActionError> {
    match recipient {
        Recipient::Candidate => match channel {
            NotificationChannel::Email => Ok(candidate.email.clone()),
            NotificationChannel::Sms => candidate
                .phone
                .clone()
                .ok_or_else(|| ActionError::permanent("candidate has no phone number")),
            NotificationChannel::InApp => Ok(candidate.id.to_string()),
        },
        Recipient::Assignee => candidate
            .assignee
            .as_ref()
            .map(ToString::to_string)
            .ok_or_else(|| ActionError::permanent("candidate has no assignee")),
        Recipient::User(user) => Ok(user.to_string()),
    }
}

fn record_outcome(workflow: &str, state: ExecutionState) {
    metrics::workflow_executions().add(
        1,
        &[
            KeyValue::new("workflow", workflow.to_string()),
            KeyValue::new("state", state.as_str()),
        ],
    );
}

fn record_action(action: &'static str, result: &'static str) {
    metrics::action_results().add(
        1,
        &[KeyValue::new("action", action), KeyValue::new("result", result)],
    );
}
