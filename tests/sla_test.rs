//! Stage SLA tracking.

use chrono::{Duration, Utc};
use talent_pipeline::error::Error;
use talent_pipeline::model::*;
use talent_pipeline::pipeline::{Pipeline, SlaStatus, sla};

#[test]
fn status_thresholds_for_a_ten_hour_stage() {
    let entered = Utc::now();
    let at = |d: Duration| sla::status(entered, entered + d, Some(10));

    assert_eq!(at(Duration::hours(5)), SlaStatus::OnTrack);
    assert_eq!(at(Duration::hours(7)), SlaStatus::AtRisk);
    assert_eq!(at(Duration::hours(10)), SlaStatus::AtRisk);
    assert_eq!(
        at(Duration::hours(10) + Duration::minutes(1)),
        SlaStatus::Breached
    );
}

#[test]
fn at_risk_boundary_is_inclusive() {
    let entered = Utc::now();
    let seventy_percent = Duration::minutes(7 * 60);
    assert_eq!(
        sla::status(entered, entered + seventy_percent, Some(10)),
        SlaStatus::AtRisk
    );
    assert_eq!(
        sla::status(
            entered,
            entered + seventy_percent - Duration::milliseconds(1),
            Some(10)
        ),
        SlaStatus::OnTrack
    );
}

#[test]
fn no_sla_is_always_on_track() {
    let entered = Utc::now() - Duration::days(365);
    assert_eq!(sla::status(entered, Utc::now(), None), SlaStatus::OnTrack);
}

async fn setup() -> (Pipeline, Process, Candidate) {
    let pipeline = Pipeline::in_memory();
    let process = pipeline
        .create_process(
            NewProcess::new("Data Engineer")
                .stage(Stage::new("screen", "Screen", 0).sla_hours(10))
                .stage(Stage::new("final", "Final", 1)),
        )
        .await
        .unwrap();
    let candidate = pipeline
        .create_candidate(
            NewCandidate::new("Alan", "Turing", "alan@example.com"),
            Actor::user("r1"),
        )
        .await
        .unwrap();
    pipeline
        .add_candidate_to_process(process.id, candidate.id, "screen".into(), Actor::user("r1"))
        .await
        .unwrap();
    (pipeline, process, candidate)
}

#[tokio::test]
async fn sla_status_resolves_membership_stage() {
    let (pipeline, process, candidate) = setup().await;
    let membership = pipeline.memberships(candidate.id).await.unwrap().remove(0);
    let entered = membership.entered_stage_at;

    let status = |d: Duration| {
        let pipeline = pipeline.clone();
        let (c, p) = (candidate.id, process.id);
        async move { pipeline.sla_status_at(c, p, entered + d).await.unwrap() }
    };
    assert_eq!(status(Duration::hours(5)).await, SlaStatus::OnTrack);
    assert_eq!(status(Duration::hours(7)).await, SlaStatus::AtRisk);
    assert_eq!(
        status(Duration::hours(10) + Duration::minutes(1)).await,
        SlaStatus::Breached
    );
}

#[tokio::test]
async fn stage_move_resets_the_clock() {
    let (pipeline, process, candidate) = setup().await;
    let moved = pipeline
        .move_stage(process.id, candidate.id, "final".into(), Actor::user("r1"))
        .await
        .unwrap();

    // The final stage has no SLA.
    let status = pipeline
        .sla_status_at(
            candidate.id,
            process.id,
            moved.entered_stage_at + Duration::days(30),
        )
        .await
        .unwrap();
    assert_eq!(status, SlaStatus::OnTrack);
}

#[tokio::test]
async fn sla_status_without_membership_is_not_found() {
    let (pipeline, process, _) = setup().await;
    let stranger = pipeline
        .create_candidate(
            NewCandidate::new("Ada", "Lovelace", "ada@example.com"),
            Actor::user("r1"),
        )
        .await
        .unwrap();
    let result = pipeline.sla_status(stranger.id, process.id).await;
    assert!(matches!(result, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn sla_report_covers_every_member() {
    let (pipeline, process, candidate) = setup().await;
    let entered = pipeline.memberships(candidate.id).await.unwrap()[0].entered_stage_at;

    let report = pipeline
        .sla_report(process.id, entered + Duration::hours(11))
        .await
        .unwrap();
    assert_eq!(report.len(), 1);
    assert_eq!(report[0].candidate_id, candidate.id);
    assert_eq!(report[0].sla_hours, Some(10));
    assert_eq!(report[0].status, SlaStatus::Breached);
}
