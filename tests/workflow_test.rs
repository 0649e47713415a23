//! Integration tests for the workflow rule engine.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use talent_pipeline::config::EngineConfig;
use talent_pipeline::error::Error;
use talent_pipeline::model::workflow::{NotificationChannel, Recipient};
use talent_pipeline::model::*;
use talent_pipeline::pipeline::Pipeline;
use talent_pipeline::workflow::effects::WebhookPayload;
use talent_pipeline::workflow::{
    ActionError, Effects, Notification, TracingEffects, WorkflowEngine,
};

fn engine() -> WorkflowEngine {
    engine_with(Arc::new(TracingEffects), EngineConfig::default())
}

fn engine_with(effects: Arc<dyn Effects>, config: EngineConfig) -> WorkflowEngine {
    WorkflowEngine::new(Pipeline::in_memory(), effects, config)
}

fn recruiter() -> Actor {
    Actor::user("recruiter-1")
}

async fn candidate(engine: &WorkflowEngine) -> Candidate {
    engine
        .pipeline()
        .create_candidate(
            NewCandidate::new("Barbara", "Liskov", "barbara@example.com"),
            recruiter(),
        )
        .await
        .unwrap()
}

async fn contact(engine: &WorkflowEngine, id: CandidateId) -> Activity {
    engine
        .pipeline()
        .transition(
            id,
            CandidateStatus::New,
            CandidateStatus::Contacted,
            recruiter(),
        )
        .await
        .unwrap()
        .into_activity()
}

async fn tag(engine: &WorkflowEngine, id: CandidateId, tag: &str) -> Activity {
    engine
        .pipeline()
        .add_tag(id, tag, recruiter())
        .await
        .unwrap()
        .expect("tag was new")
}

fn on_tag(name: &str, tag: &str) -> NewWorkflow {
    NewWorkflow::new(
        name,
        Trigger::TagAdded {
            tags: vec![tag.to_string()],
        },
    )
}

/// Fails every webhook call until `failures` calls have failed.
struct FlakyEffects {
    failures: AtomicU32,
    retryable: bool,
    calls: AtomicU32,
}

impl FlakyEffects {
    fn new(failures: u32, retryable: bool) -> Arc<Self> {
        Arc::new(Self {
            failures: AtomicU32::new(failures),
            retryable,
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl Effects for FlakyEffects {
    async fn send_notification(&self, _: &Notification) -> Result<(), ActionError> {
        Ok(())
    }

    async fn call_webhook(&self, _: &str, _: &WebhookPayload) -> Result<u16, ActionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining == 0 {
            return Ok(204);
        }
        self.failures.store(remaining - 1, Ordering::SeqCst);
        Err(ActionError {
            message: "upstream unavailable".into(),
            retryable: self.retryable,
        })
    }
}

fn webhook() -> Action {
    Action::CallWebhook {
        url: "https://hooks.example.com/ats".into(),
    }
}

// ---------------------------------------------------------------------------
// Trigger matching
// ---------------------------------------------------------------------------

#[tokio::test]
async fn status_trigger_fires_once_for_matching_transition() {
    let engine = engine();
    engine
        .register_workflow(
            NewWorkflow::new(
                "welcome",
                Trigger::StatusChanged {
                    from: vec![],
                    to: vec![CandidateStatus::Contacted],
                },
            )
            .action(Action::AddTag {
                tag: "welcomed".into(),
            }),
        )
        .await
        .unwrap();
    let c = candidate(&engine).await;

    let activity = contact(&engine, c.id).await;
    let fired = engine
        .evaluate_event_at(&activity, activity.timestamp)
        .await
        .unwrap();

    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].state, ExecutionState::Completed);
    assert_eq!(fired[0].results.len(), 1);
    assert_eq!(fired[0].results[0].status, ActionStatus::Succeeded);
    let after = engine.pipeline().get_candidate(c.id).await.unwrap();
    assert!(after.has_tag("welcomed"));

    // The tag was added by the workflow, one hop down the cascade.
    let tag_activity = engine
        .pipeline()
        .activities(c.id)
        .await
        .unwrap()
        .into_iter()
        .find(|a| matches!(a.kind, ActivityKind::TagAdded { .. }))
        .unwrap();
    assert_eq!(tag_activity.depth, 1);
    assert!(matches!(tag_activity.actor, Actor::Workflow(_)));
}

#[tokio::test]
async fn status_trigger_ignores_other_transitions() {
    let engine = engine();
    engine
        .register_workflow(
            NewWorkflow::new(
                "welcome",
                Trigger::StatusChanged {
                    from: vec![],
                    to: vec![CandidateStatus::Contacted],
                },
            )
            .action(Action::AddTag {
                tag: "welcomed".into(),
            }),
        )
        .await
        .unwrap();
    let c = candidate(&engine).await;
    let pipeline = engine.pipeline();
    pipeline
        .request_transition(c.id, CandidateStatus::Screening, recruiter())
        .await
        .unwrap();
    let activity = pipeline
        .request_transition(c.id, CandidateStatus::InterviewScheduled, recruiter())
        .await
        .unwrap()
        .into_activity();

    let fired = engine.evaluate_event(&activity).await.unwrap();
    assert!(fired.is_empty());
    assert!(engine.executions_for_candidate(c.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn re_evaluating_an_activity_fires_nothing_new() {
    let engine = engine();
    let id = engine
        .register_workflow(on_tag("vip-alert", "vip").action(Action::AddTag {
            tag: "flagged".into(),
        }))
        .await
        .unwrap();
    let c = candidate(&engine).await;
    let activity = tag(&engine, c.id, "vip").await;

    assert_eq!(engine.evaluate_event(&activity).await.unwrap().len(), 1);
    assert!(engine.evaluate_event(&activity).await.unwrap().is_empty());
    assert_eq!(engine.executions_for_workflow(id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn inactive_workflows_do_not_fire() {
    let engine = engine();
    engine
        .register_workflow(on_tag("dormant", "vip").inactive().action(Action::AddTag {
            tag: "flagged".into(),
        }))
        .await
        .unwrap();
    let c = candidate(&engine).await;
    let activity = tag(&engine, c.id, "vip").await;
    assert!(engine.evaluate_event(&activity).await.unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Guards and limits
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failed_guard_records_a_skipped_execution() {
    let engine = engine();
    engine
        .register_workflow(
            on_tag("referrals-only", "vip")
                .filter(TriggerFilter {
                    sources: Some(vec![CandidateSource::Referral]),
                    ..TriggerFilter::default()
                })
                .action(Action::AddTag {
                    tag: "flagged".into(),
                }),
        )
        .await
        .unwrap();
    let c = candidate(&engine).await;
    let activity = tag(&engine, c.id, "vip").await;

    let fired = engine.evaluate_event(&activity).await.unwrap();
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].state, ExecutionState::Skipped);
    assert_eq!(fired[0].skip_reason, Some(SkipReason::GuardFailed));
    assert!(!engine.pipeline().get_candidate(c.id).await.unwrap().has_tag("flagged"));
}

#[tokio::test]
async fn per_candidate_limit_skips_the_second_firing() {
    let engine = engine();
    engine
        .register_workflow(
            on_tag("once", "vip")
                .max_executions_per_candidate(1)
                .action(Action::AddTag {
                    tag: "flagged".into(),
                }),
        )
        .await
        .unwrap();
    let c = candidate(&engine).await;
    let pipeline = engine.pipeline();

    let first = tag(&engine, c.id, "vip").await;
    pipeline.remove_tag(c.id, "vip", recruiter()).await.unwrap();
    let second = tag(&engine, c.id, "vip").await;

    let a = engine.evaluate_event(&first).await.unwrap();
    let b = engine.evaluate_event(&second).await.unwrap();

    assert_eq!(a[0].state, ExecutionState::Completed);
    assert_eq!(b[0].state, ExecutionState::Skipped);
    assert_eq!(b[0].skip_reason, Some(SkipReason::RateLimited));
}

#[tokio::test]
async fn daily_limit_spans_candidates() {
    let engine = engine();
    engine
        .register_workflow(
            on_tag("daily", "vip")
                .max_executions_per_day(1)
                .action(Action::AddTag {
                    tag: "flagged".into(),
                }),
        )
        .await
        .unwrap();
    let a = candidate(&engine).await;
    let b = candidate(&engine).await;

    let first = tag(&engine, a.id, "vip").await;
    let second = tag(&engine, b.id, "vip").await;
    let now = second.timestamp;

    let fired_a = engine.evaluate_event_at(&first, now).await.unwrap();
    let fired_b = engine.evaluate_event_at(&second, now).await.unwrap();
    assert_eq!(fired_a[0].state, ExecutionState::Completed);
    assert_eq!(fired_b[0].skip_reason, Some(SkipReason::RateLimited));

    // A day later the window has moved on.
    pipeline_retag(&engine, b.id).await;
    let third = tag(&engine, b.id, "vip").await;
    let fired = engine
        .evaluate_event_at(&third, now + Duration::hours(25))
        .await
        .unwrap();
    assert_eq!(fired[0].state, ExecutionState::Completed);
}

async fn pipeline_retag(engine: &WorkflowEngine, id: CandidateId) {
    engine
        .pipeline()
        .remove_tag(id, "vip", recruiter())
        .await
        .unwrap();
}

// ---------------------------------------------------------------------------
// Scheduling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn delayed_step_waits_until_due() {
    let engine = engine();
    engine
        .register_workflow(on_tag("follow-up", "vip").step(WorkflowStep::delayed(
            Action::AddTag {
                tag: "followed-up".into(),
            },
            60,
        )))
        .await
        .unwrap();
    let c = candidate(&engine).await;
    let activity = tag(&engine, c.id, "vip").await;
    let t0 = activity.timestamp;

    let fired = engine.evaluate_event_at(&activity, t0).await.unwrap();
    assert_eq!(fired[0].state, ExecutionState::Pending);
    assert_eq!(fired[0].resume_at, Some(t0 + Duration::minutes(60)));

    assert!(engine
        .run_due(t0 + Duration::minutes(30))
        .await
        .unwrap()
        .is_empty());
    assert!(!engine.pipeline().get_candidate(c.id).await.unwrap().has_tag("followed-up"));

    let ran = engine.run_due(t0 + Duration::minutes(61)).await.unwrap();
    assert_eq!(ran.len(), 1);
    assert_eq!(ran[0].state, ExecutionState::Completed);
    assert!(engine.pipeline().get_candidate(c.id).await.unwrap().has_tag("followed-up"));
}

#[tokio::test]
async fn negative_delay_runs_before_the_interview() {
    let engine = engine();
    engine
        .register_workflow(
            NewWorkflow::new("interview-reminder", Trigger::InterviewScheduled).step(
                WorkflowStep::delayed(
                    Action::SendNotification {
                        channel: NotificationChannel::Email,
                        recipient: Recipient::Candidate,
                        template: "interview-reminder".into(),
                    },
                    -60,
                ),
            ),
        )
        .await
        .unwrap();
    let c = candidate(&engine).await;
    let interview_at = Utc::now() + Duration::days(3);
    let activity = engine
        .pipeline()
        .schedule_interview(c.id, interview_at, None, recruiter())
        .await
        .unwrap();

    let fired = engine
        .evaluate_event_at(&activity, activity.timestamp)
        .await
        .unwrap();
    let reminder_at = interview_at - Duration::hours(1);
    assert_eq!(fired[0].anchor_at, interview_at);
    assert_eq!(fired[0].resume_at, Some(reminder_at));

    let ran = engine.run_due(reminder_at).await.unwrap();
    assert_eq!(ran[0].state, ExecutionState::Completed);
    let sent = engine
        .pipeline()
        .activities(c.id)
        .await
        .unwrap()
        .into_iter()
        .any(|a| matches!(a.kind, ActivityKind::NotificationSent { .. }));
    assert!(sent);
}

#[tokio::test]
async fn run_execution_is_idempotent() {
    let engine = engine();
    engine
        .register_workflow(on_tag("welcome", "vip").action(Action::AddTag {
            tag: "flagged".into(),
        }))
        .await
        .unwrap();
    let c = candidate(&engine).await;
    let activity = tag(&engine, c.id, "vip").await;
    let fired = engine.evaluate_event(&activity).await.unwrap();

    let again = engine
        .run_execution(fired[0].id, Utc::now())
        .await
        .unwrap();
    assert_eq!(again, fired[0]);
}

// ---------------------------------------------------------------------------
// Failures and retries
// ---------------------------------------------------------------------------

fn retry_config() -> EngineConfig {
    EngineConfig {
        max_attempts: 3,
        retry_backoff: std::time::Duration::from_secs(30),
        ..EngineConfig::default()
    }
}

async fn fire_webhook(engine: &WorkflowEngine, steps: Vec<Action>, policy: FailurePolicy)
-> (Candidate, WorkflowExecution, DateTime<Utc>) {
    let mut workflow = on_tag("notify-crm", "vip").failure_policy(policy);
    for action in steps {
        workflow = workflow.action(action);
    }
    engine.register_workflow(workflow).await.unwrap();
    let c = candidate(engine).await;
    let activity = tag(engine, c.id, "vip").await;
    let t0 = activity.timestamp;
    let fired = engine.evaluate_event_at(&activity, t0).await.unwrap();
    (c, fired.into_iter().next().unwrap(), t0)
}

#[tokio::test]
async fn retryable_failure_backs_off_then_fails_after_max_attempts() {
    let effects = FlakyEffects::new(u32::MAX, true);
    let engine = engine_with(effects.clone(), retry_config());
    let (_, execution, t0) =
        fire_webhook(&engine, vec![webhook()], FailurePolicy::ContinueOnFailure).await;

    assert_eq!(execution.state, ExecutionState::Pending);
    assert_eq!(execution.results[0].status, ActionStatus::Retrying);
    assert_eq!(execution.results[0].attempts, 1);
    assert_eq!(execution.resume_at, Some(t0 + Duration::seconds(30)));

    let t1 = t0 + Duration::seconds(30);
    let second = engine.run_due(t1).await.unwrap().remove(0);
    assert_eq!(second.results[0].attempts, 2);
    assert_eq!(second.resume_at, Some(t1 + Duration::seconds(60)));

    let third = engine
        .run_due(t1 + Duration::seconds(60))
        .await
        .unwrap()
        .remove(0);
    assert_eq!(third.state, ExecutionState::Failed);
    assert_eq!(third.results[0].status, ActionStatus::Failed);
    assert_eq!(third.results[0].attempts, 3);
    assert_eq!(
        third.results[0].error.as_deref(),
        Some("upstream unavailable")
    );
    assert_eq!(effects.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn retry_that_succeeds_completes_the_execution() {
    let engine = engine_with(FlakyEffects::new(1, true), retry_config());
    let (c, execution, t0) =
        fire_webhook(&engine, vec![webhook()], FailurePolicy::ContinueOnFailure).await;
    assert_eq!(execution.state, ExecutionState::Pending);

    let done = engine
        .run_due(t0 + Duration::seconds(30))
        .await
        .unwrap()
        .remove(0);
    assert_eq!(done.state, ExecutionState::Completed);
    assert_eq!(done.results[0].attempts, 2);

    let called = engine
        .pipeline()
        .activities(c.id)
        .await
        .unwrap()
        .into_iter()
        .any(|a| matches!(a.kind, ActivityKind::WebhookCalled { status: 204, .. }));
    assert!(called);
}

#[tokio::test]
async fn permanent_failure_continues_to_later_steps() {
    let engine = engine_with(FlakyEffects::new(1, false), retry_config());
    let (c, execution, _) = fire_webhook(
        &engine,
        vec![
            webhook(),
            Action::AddTag {
                tag: "synced".into(),
            },
        ],
        FailurePolicy::ContinueOnFailure,
    )
    .await;

    assert_eq!(execution.state, ExecutionState::Completed);
    assert_eq!(execution.results.len(), 2);
    assert_eq!(execution.results[0].status, ActionStatus::Failed);
    assert_eq!(execution.results[0].attempts, 1);
    assert_eq!(execution.results[1].status, ActionStatus::Succeeded);
    assert!(engine.pipeline().get_candidate(c.id).await.unwrap().has_tag("synced"));
}

#[tokio::test]
async fn stop_on_failure_ends_the_execution() {
    let engine = engine_with(FlakyEffects::new(1, false), retry_config());
    let (c, execution, _) = fire_webhook(
        &engine,
        vec![
            webhook(),
            Action::AddTag {
                tag: "synced".into(),
            },
        ],
        FailurePolicy::StopOnFailure,
    )
    .await;

    assert_eq!(execution.state, ExecutionState::Failed);
    assert_eq!(execution.results.len(), 1);
    assert!(!engine.pipeline().get_candidate(c.id).await.unwrap().has_tag("synced"));
}

#[tokio::test]
async fn status_actions_obey_the_state_machine() {
    let engine = engine();
    engine
        .register_workflow(on_tag("fast-track", "vip").action(Action::ChangeStatus {
            to: CandidateStatus::Hired,
        }))
        .await
        .unwrap();
    let c = candidate(&engine).await;
    let activity = tag(&engine, c.id, "vip").await;

    let fired = engine.evaluate_event(&activity).await.unwrap();
    assert_eq!(fired[0].state, ExecutionState::Failed);
    let error = fired[0].results[0].error.clone().unwrap();
    assert!(error.contains("invalid transition"), "{error}");
    assert_eq!(
        engine.pipeline().get_candidate(c.id).await.unwrap().status,
        CandidateStatus::New
    );
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

async fn pending_execution(engine: &WorkflowEngine) -> (Candidate, WorkflowExecution, WorkflowId) {
    let id = engine
        .register_workflow(on_tag("nudge", "vip").step(WorkflowStep::delayed(
            Action::AddTag {
                tag: "old".into(),
            },
            60,
        )))
        .await
        .unwrap();
    let c = candidate(engine).await;
    let activity = tag(engine, c.id, "vip").await;
    let fired = engine
        .evaluate_event_at(&activity, activity.timestamp)
        .await
        .unwrap();
    (c, fired.into_iter().next().unwrap(), id)
}

#[tokio::test]
async fn revoke_cancels_a_pending_execution() {
    let engine = engine();
    let (c, execution, _) = pending_execution(&engine).await;

    let revoked = engine.revoke(execution.id, recruiter()).await.unwrap();
    assert_eq!(revoked.state, ExecutionState::Cancelled);

    assert!(engine
        .run_due(Utc::now() + Duration::days(1))
        .await
        .unwrap()
        .is_empty());
    assert!(!engine.pipeline().get_candidate(c.id).await.unwrap().has_tag("old"));

    let again = engine.revoke(execution.id, recruiter()).await;
    assert!(matches!(again, Err(Error::InvalidTransition { .. })));
}

#[tokio::test]
async fn executions_keep_their_step_snapshot() {
    let engine = engine();
    let (c, execution, workflow_id) = pending_execution(&engine).await;

    let updated = engine
        .update_workflow(
            workflow_id,
            on_tag("nudge", "vip").action(Action::AddTag { tag: "new".into() }),
        )
        .await
        .unwrap();
    assert_eq!(updated.version, 2);

    let ran = engine
        .run_due(execution.anchor_at + Duration::minutes(60))
        .await
        .unwrap();
    assert_eq!(ran[0].workflow_version, 1);
    let after = engine.pipeline().get_candidate(c.id).await.unwrap();
    assert!(after.has_tag("old"));
    assert!(!after.has_tag("new"));
}

#[tokio::test]
async fn deactivated_workflow_skips_deferred_work() {
    let engine = engine();
    let (_, execution, workflow_id) = pending_execution(&engine).await;

    engine
        .set_workflow_active(workflow_id, false)
        .await
        .unwrap();
    let ran = engine
        .run_due(execution.anchor_at + Duration::minutes(60))
        .await
        .unwrap();
    assert_eq!(ran[0].state, ExecutionState::Skipped);
    assert_eq!(ran[0].skip_reason, Some(SkipReason::WorkflowInactive));
}

#[tokio::test]
async fn fired_executions_are_logged_on_the_candidate() {
    let engine = engine();
    let (c, execution, workflow_id) = pending_execution(&engine).await;
    let logged = engine
        .pipeline()
        .activities(c.id)
        .await
        .unwrap()
        .into_iter()
        .any(|a| {
            a.kind
                == ActivityKind::WorkflowFired {
                    workflow_id,
                    execution_id: execution.id,
                }
        });
    assert!(logged);
}

#[tokio::test]
async fn cascades_stop_at_the_depth_limit() {
    let engine = engine_with(
        Arc::new(TracingEffects),
        EngineConfig {
            max_cascade_depth: 2,
            ..EngineConfig::default()
        },
    );
    for (on, add) in [("a", "b"), ("b", "c"), ("c", "d")] {
        engine
            .register_workflow(on_tag(&format!("{on}-to-{add}"), on).action(Action::AddTag {
                tag: add.into(),
            }))
            .await
            .unwrap();
    }
    let c = candidate(&engine).await;
    let mut events = engine.pipeline().activity_log().subscribe();
    tag(&engine, c.id, "a").await;

    while let Ok(activity) = events.try_recv() {
        engine.evaluate_event(&activity).await.unwrap();
    }

    let after = engine.pipeline().get_candidate(c.id).await.unwrap();
    assert!(after.has_tag("b"));
    assert!(after.has_tag("c"));
    assert!(!after.has_tag("d"), "depth-2 activity must not trigger");
}

#[tokio::test]
async fn manual_workflows_fire_on_request() {
    let engine = engine();
    let id = engine
        .register_workflow(
            NewWorkflow::new("escalate", Trigger::Manual).action(Action::CreateTask {
                title: "Call back".into(),
                assignee: Some(UserId::new("lead")),
                due_in_hours: Some(4),
            }),
        )
        .await
        .unwrap();
    let c = candidate(&engine).await;

    let first = engine.fire_manual(id, c.id, recruiter()).await.unwrap();
    let second = engine.fire_manual(id, c.id, recruiter()).await.unwrap();
    assert_eq!(first.state, ExecutionState::Completed);
    assert_ne!(first.id, second.id);

    let tasks = engine
        .pipeline()
        .activities(c.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|a| matches!(a.kind, ActivityKind::TaskCreated { .. }))
        .count();
    assert_eq!(tasks, 2);
}

#[tokio::test]
async fn invalid_definitions_are_rejected() {
    let engine = engine();
    let result = engine
        .register_workflow(NewWorkflow::new(
            "nothing",
            Trigger::StatusChanged {
                from: vec![],
                to: vec![],
            },
        ))
        .await;
    assert!(matches!(result, Err(Error::Validation(_))));

    let result = engine
        .register_workflow(on_tag("bad-hook", "vip").action(Action::CallWebhook {
            url: "ftp://example.com".into(),
        }))
        .await;
    assert!(matches!(result, Err(Error::Validation(_))));
}

#[tokio::test]
async fn out_of_range_delays_are_rejected() {
    use talent_pipeline::model::workflow::MAX_DELAY_MINUTES;

    let engine = engine();
    for delay in [i64::MAX / 1000, i64::MIN, MAX_DELAY_MINUTES + 1, -MAX_DELAY_MINUTES - 1] {
        let result = engine
            .register_workflow(NewWorkflow::new("later", Trigger::Manual).step(
                WorkflowStep::delayed(
                    Action::AddTag {
                        tag: "later".into(),
                    },
                    delay,
                ),
            ))
            .await;
        assert!(matches!(result, Err(Error::Validation(_))), "delay {delay}");
    }

    let id = engine
        .register_workflow(NewWorkflow::new("next-year", Trigger::Manual).step(
            WorkflowStep::delayed(
                Action::AddTag {
                    tag: "later".into(),
                },
                MAX_DELAY_MINUTES,
            ),
        ))
        .await
        .unwrap();
    let c = candidate(&engine).await;
    let execution = engine.fire_manual(id, c.id, recruiter()).await.unwrap();
    assert_eq!(execution.state, ExecutionState::Pending);
    assert_eq!(
        execution.resume_at,
        Some(execution.anchor_at + Duration::minutes(MAX_DELAY_MINUTES))
    );
}

#[tokio::test]
async fn out_of_range_thresholds_are_rejected() {
    let engine = engine();
    let result = engine
        .register_workflow(
            NewWorkflow::new("forever", Trigger::NoActivity { days: u32::MAX }).action(
                Action::AddTag {
                    tag: "stale".into(),
                },
            ),
        )
        .await;
    assert!(matches!(result, Err(Error::Validation(_))));

    let result = engine
        .register_workflow(NewWorkflow::new("slow-task", Trigger::Manual).action(
            Action::CreateTask {
                title: "Eventually".into(),
                assignee: None,
                due_in_hours: Some(u32::MAX),
            },
        ))
        .await;
    assert!(matches!(result, Err(Error::Validation(_))));
}
