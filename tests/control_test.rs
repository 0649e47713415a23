//! End-to-end: the control plane reacting to live activity.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use talent_pipeline::config::EngineConfig;
use talent_pipeline::engine::ControlPlane;
use talent_pipeline::model::workflow::{NotificationChannel, Recipient};
use talent_pipeline::model::*;
use talent_pipeline::pipeline::Pipeline;
use talent_pipeline::workflow::effects::WebhookPayload;
use talent_pipeline::workflow::{
    ActionError, Effects, Notification, TracingEffects, WorkflowEngine,
};

async fn wait_for<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check().await
}

/// Notifications that take a couple of milliseconds each, so a single
/// evaluation slot falls behind a burst of activity.
struct SlowEffects;

#[async_trait]
impl Effects for SlowEffects {
    async fn send_notification(&self, _: &Notification) -> Result<(), ActionError> {
        tokio::time::sleep(Duration::from_millis(2)).await;
        Ok(())
    }

    async fn call_webhook(&self, _: &str, _: &WebhookPayload) -> Result<u16, ActionError> {
        Ok(204)
    }
}

fn contacted_trigger() -> Trigger {
    Trigger::StatusChanged {
        from: vec![],
        to: vec![CandidateStatus::Contacted],
    }
}

#[tokio::test]
async fn control_plane_runs_workflows_for_bus_events() {
    let engine = WorkflowEngine::new(
        Pipeline::in_memory(),
        Arc::new(TracingEffects),
        EngineConfig {
            scan_interval: Duration::from_millis(50),
            ..EngineConfig::default()
        },
    );
    engine
        .register_workflow(
            NewWorkflow::new("welcome", contacted_trigger()).action(Action::AddTag {
                tag: "welcomed".into(),
            }),
        )
        .await
        .unwrap();

    let control = ControlPlane::new(engine.clone());
    let handle = tokio::spawn({
        let control = control.clone();
        async move { control.run().await }
    });
    // Let the loop subscribe before producing events.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let pipeline = engine.pipeline().clone();
    let candidate = pipeline
        .create_candidate(
            NewCandidate::new("Frances", "Allen", "frances@example.com"),
            Actor::user("recruiter-1"),
        )
        .await
        .unwrap();
    pipeline
        .request_transition(candidate.id, CandidateStatus::Contacted, Actor::user("recruiter-1"))
        .await
        .unwrap();

    let tagged = wait_for(Duration::from_secs(2), || {
        let pipeline = pipeline.clone();
        async move {
            pipeline
                .get_candidate(candidate.id)
                .await
                .is_ok_and(|c| c.has_tag("welcomed"))
        }
    })
    .await;
    assert!(tagged, "workflow did not run");

    control.shutdown();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("control plane did not stop")
        .unwrap()
        .unwrap();

    let executions = engine.executions_for_candidate(candidate.id).await.unwrap();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].state, ExecutionState::Completed);
}

#[tokio::test]
async fn shutdown_before_run_returns_promptly() {
    let engine = WorkflowEngine::new(
        Pipeline::in_memory(),
        Arc::new(TracingEffects),
        EngineConfig::default(),
    );
    let control = ControlPlane::new(engine);
    control.shutdown();
    tokio::time::timeout(Duration::from_secs(5), control.run())
        .await
        .expect("control plane did not stop")
        .unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn lagging_bus_still_evaluates_every_activity() {
    const CANDIDATES: usize = 1500;

    let engine = WorkflowEngine::new(
        Pipeline::in_memory(),
        Arc::new(SlowEffects),
        EngineConfig {
            scan_interval: Duration::from_secs(3600),
            max_concurrent_evaluations: 1,
            ..EngineConfig::default()
        },
    );
    let workflow = engine
        .register_workflow(
            NewWorkflow::new("outreach", contacted_trigger()).action(Action::SendNotification {
                channel: NotificationChannel::Email,
                recipient: Recipient::Candidate,
                template: "outreach".into(),
            }),
        )
        .await
        .unwrap();

    let control = ControlPlane::new(engine.clone());
    let handle = tokio::spawn({
        let control = control.clone();
        async move { control.run().await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Two activities per candidate against a bus of 1024 and 2ms per
    // evaluation: the receiver is guaranteed to lag.
    let pipeline = engine.pipeline().clone();
    for i in 0..CANDIDATES {
        let candidate = pipeline
            .create_candidate(
                NewCandidate::new("Bulk", format!("Candidate{i}"), format!("bulk{i}@example.com")),
                Actor::user("recruiter-1"),
            )
            .await
            .unwrap();
        pipeline
            .request_transition(candidate.id, CandidateStatus::Contacted, Actor::user("recruiter-1"))
            .await
            .unwrap();
    }

    let all_ran = wait_for(Duration::from_secs(60), || {
        let engine = engine.clone();
        async move {
            engine
                .executions_for_workflow(workflow)
                .await
                .is_ok_and(|executions| executions.len() == CANDIDATES)
        }
    })
    .await;

    control.shutdown();
    tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .expect("control plane did not stop")
        .unwrap()
        .unwrap();

    let executions = engine.executions_for_workflow(workflow).await.unwrap();
    assert!(all_ran, "only {} of {CANDIDATES} contacted candidates ran", executions.len());
    assert!(executions.iter().all(|e| e.state == ExecutionState::Completed));
}
