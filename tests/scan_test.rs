//! Periodic scan: time-based triggers and SLA breach detection.

use std::sync::Arc;

use chrono::Duration;
use talent_pipeline::config::EngineConfig;
use talent_pipeline::engine::{ScanReport, Scanner};
use talent_pipeline::model::*;
use talent_pipeline::pipeline::Pipeline;
use talent_pipeline::workflow::{TracingEffects, WorkflowEngine};

fn setup() -> (WorkflowEngine, Scanner) {
    let engine = WorkflowEngine::new(
        Pipeline::in_memory(),
        Arc::new(TracingEffects),
        EngineConfig::default(),
    );
    let scanner = Scanner::new(engine.clone());
    (engine, scanner)
}

fn recruiter() -> Actor {
    Actor::user("recruiter-1")
}

async fn process_with_member(engine: &WorkflowEngine) -> (Process, Candidate) {
    let pipeline = engine.pipeline();
    let process = pipeline
        .create_process(
            NewProcess::new("Backend Engineer")
                .stage(Stage::new("screen", "Screen", 0).sla_hours(1))
                .stage(Stage::new("onsite", "Onsite", 1)),
        )
        .await
        .unwrap();
    pipeline.activate_process(process.id).await.unwrap();
    let candidate = pipeline
        .create_candidate(
            NewCandidate::new("Edsger", "Dijkstra", "edsger@example.com"),
            recruiter(),
        )
        .await
        .unwrap();
    pipeline
        .add_candidate_to_process(process.id, candidate.id, "screen".into(), recruiter())
        .await
        .unwrap();
    (process, candidate)
}

async fn entered_at(engine: &WorkflowEngine, candidate: CandidateId) -> chrono::DateTime<chrono::Utc> {
    engine.pipeline().memberships(candidate).await.unwrap()[0].entered_stage_at
}

#[tokio::test]
async fn empty_store_scans_clean() {
    let (_, scanner) = setup();
    let report = scanner.scan(chrono::Utc::now()).await.unwrap();
    assert_eq!(report, ScanReport::default());
}

#[tokio::test]
async fn days_in_stage_fires_once_per_stage_stay() {
    let (engine, scanner) = setup();
    let workflow = engine
        .register_workflow(
            NewWorkflow::new(
                "stale-screen",
                Trigger::DaysInStage {
                    process_id: None,
                    stage_id: Some("screen".into()),
                    days: 2,
                },
            )
            .action(Action::AddTag {
                tag: "stale".into(),
            }),
        )
        .await
        .unwrap();
    let (process, candidate) = process_with_member(&engine).await;
    let entered = entered_at(&engine, candidate.id).await;

    assert_eq!(scanner.scan(entered + Duration::days(1)).await.unwrap().fired, 0);
    assert_eq!(scanner.scan(entered + Duration::days(3)).await.unwrap().fired, 1);
    assert_eq!(scanner.scan(entered + Duration::days(4)).await.unwrap().fired, 0);

    let executions = engine.executions_for_workflow(workflow).await.unwrap();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].anchor_at, entered + Duration::days(2));
    assert!(engine.pipeline().get_candidate(candidate.id).await.unwrap().has_tag("stale"));

    // Leaving and re-entering the stage starts a new stay.
    let pipeline = engine.pipeline();
    pipeline
        .move_stage(process.id, candidate.id, "onsite".into(), recruiter())
        .await
        .unwrap();
    let back = pipeline
        .move_stage(process.id, candidate.id, "screen".into(), recruiter())
        .await
        .unwrap();
    let report = scanner
        .scan(back.entered_stage_at + Duration::days(3))
        .await
        .unwrap();
    assert_eq!(report.fired, 1);
    assert_eq!(engine.executions_for_workflow(workflow).await.unwrap().len(), 2);
}

#[tokio::test]
async fn days_in_stage_respects_the_stage_filter() {
    let (engine, scanner) = setup();
    engine
        .register_workflow(
            NewWorkflow::new(
                "stale-onsite",
                Trigger::DaysInStage {
                    process_id: None,
                    stage_id: Some("onsite".into()),
                    days: 1,
                },
            )
            .action(Action::AddTag {
                tag: "stale".into(),
            }),
        )
        .await
        .unwrap();
    let (_, candidate) = process_with_member(&engine).await;
    let entered = entered_at(&engine, candidate.id).await;
    assert_eq!(scanner.scan(entered + Duration::days(5)).await.unwrap().fired, 0);
}

#[tokio::test]
async fn no_activity_refires_only_after_new_engagement() {
    let (engine, scanner) = setup();
    let workflow = engine
        .register_workflow(
            NewWorkflow::new("nudge", Trigger::NoActivity { days: 7 }).step(
                WorkflowStep::delayed(
                    Action::AddTag {
                        tag: "nudged".into(),
                    },
                    60 * 24 * 30,
                ),
            ),
        )
        .await
        .unwrap();
    let candidate = engine
        .pipeline()
        .create_candidate(
            NewCandidate::new("Grace", "Hopper", "grace@example.com"),
            recruiter(),
        )
        .await
        .unwrap();
    let quiet = candidate.created_at + Duration::days(8);

    assert_eq!(scanner.scan(candidate.created_at).await.unwrap().fired, 0);
    assert_eq!(scanner.scan(quiet).await.unwrap().fired, 1);
    assert_eq!(scanner.scan(quiet).await.unwrap().fired, 0);

    // The firing itself is not engagement; a recruiter note is.
    engine
        .pipeline()
        .add_note(candidate.id, "left a voicemail", recruiter())
        .await
        .unwrap();
    assert_eq!(scanner.scan(quiet).await.unwrap().fired, 1);
    assert_eq!(engine.executions_for_workflow(workflow).await.unwrap().len(), 2);
}

#[tokio::test]
async fn no_activity_skips_terminal_candidates() {
    let (engine, scanner) = setup();
    engine
        .register_workflow(
            NewWorkflow::new("nudge", Trigger::NoActivity { days: 7 }).action(Action::AddTag {
                tag: "nudged".into(),
            }),
        )
        .await
        .unwrap();
    let pipeline = engine.pipeline();
    let candidate = pipeline
        .create_candidate(
            NewCandidate::new("Ken", "Thompson", "ken@example.com"),
            recruiter(),
        )
        .await
        .unwrap();
    pipeline
        .request_transition(candidate.id, CandidateStatus::Archived, recruiter())
        .await
        .unwrap();

    let report = scanner
        .scan(candidate.created_at + Duration::days(30))
        .await
        .unwrap();
    assert_eq!(report.fired, 0);
}

#[tokio::test]
async fn sla_breach_is_recorded_once_and_fires_workflows() {
    let (engine, scanner) = setup();
    let workflow = engine
        .register_workflow(
            NewWorkflow::new("escalate", Trigger::SlaBreached { process_id: None }).action(
                Action::AddTag {
                    tag: "escalated".into(),
                },
            ),
        )
        .await
        .unwrap();
    let (_, candidate) = process_with_member(&engine).await;
    let entered = entered_at(&engine, candidate.id).await;

    assert_eq!(
        scanner.scan(entered + Duration::minutes(30)).await.unwrap().breaches,
        0
    );
    assert_eq!(
        scanner.scan(entered + Duration::hours(2)).await.unwrap().breaches,
        1
    );
    assert_eq!(
        scanner.scan(entered + Duration::hours(3)).await.unwrap().breaches,
        0
    );

    let breaches = engine
        .pipeline()
        .activities(candidate.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|a| matches!(a.kind, ActivityKind::SlaBreached { .. }))
        .count();
    assert_eq!(breaches, 1);
    assert_eq!(engine.executions_for_workflow(workflow).await.unwrap().len(), 1);
    assert!(engine.pipeline().get_candidate(candidate.id).await.unwrap().has_tag("escalated"));
}

#[tokio::test]
async fn closed_processes_are_not_scanned() {
    let (engine, scanner) = setup();
    let (process, candidate) = process_with_member(&engine).await;
    engine.pipeline().complete_process(process.id).await.unwrap();
    let entered = entered_at(&engine, candidate.id).await;

    let report = scanner.scan(entered + Duration::days(1)).await.unwrap();
    assert_eq!(report.breaches, 0);
}
