//! Periodic scan: time-based triggers and SLA breaches.
//!
//! Nothing in the activity stream says "five days have passed", so these are
//! found by looking at the clock. Every firing carries a key derived from the
//! state it observed, which keeps repeated scans from firing twice.

use chrono::{DateTime, Duration, Utc};
use opentelemetry::KeyValue;
use tracing::{Instrument, error, info, warn};

use crate::error::Result;
use crate::model::*;
use crate::pipeline::{Origin, SlaStatus, sla};
use crate::telemetry::metrics;
use crate::telemetry::pipeline::start_scan_span;
use crate::workflow::WorkflowEngine;
use crate::workflow::engine::Firing;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Executions created by time-based triggers.
    pub fired: usize,
    /// New SLA breaches recorded.
    pub breaches: usize,
}

#[derive(Clone)]
pub struct Scanner {
    engine: WorkflowEngine,
}

impl Scanner {
    pub fn new(engine: WorkflowEngine) -> Self {
        Self { engine }
    }

    pub async fn scan(&self, now: DateTime<Utc>) -> Result<ScanReport> {
        let span = start_scan_span();
        let report = async {
            let breaches = self.record_breaches(now).await?;
            let fired = self.fire_time_based(now).await?;
            Ok::<_, crate::error::Error>(ScanReport { fired, breaches })
        }
        .instrument(span.clone())
        .await?;
        span.record("scan.fired", report.fired);
        span.record("scan.breaches", report.breaches);
        if report.fired > 0 || report.breaches > 0 {
            info!(fired = report.fired, breaches = report.breaches, "scan complete");
        }
        Ok(report)
    }

    /// Append one `sla_breached` activity per stage stay that overran its SLA.
    async fn record_breaches(&self, now: DateTime<Utc>) -> Result<usize> {
        let pipeline = self.engine.pipeline();
        let mut breaches = 0;
        for process in pipeline.list_processes().await? {
            if !process.is_open() {
                continue;
            }
            for membership in pipeline.process_members(process.id).await? {
                let Some(stage) = process.stage(&membership.stage_id) else {
                    continue;
                };
                if sla::status(membership.entered_stage_at, now, stage.sla_hours)
                    != SlaStatus::Breached
                {
                    continue;
                }
                if self.breach_recorded(&membership).await? {
                    continue;
                }
                let activity = pipeline
                    .record(
                        membership.candidate_id,
                        &Origin::system(),
                        ActivityKind::SlaBreached {
                            process_id: process.id,
                            stage_id: membership.stage_id.clone(),
                            entered_stage_at: membership.entered_stage_at,
                        },
                    )
                    .await?;
                metrics::sla_breaches().add(
                    1,
                    &[
                        KeyValue::new("process", process.name.clone()),
                        KeyValue::new("stage", membership.stage_id.to_string()),
                    ],
                );
                warn!(
                    process_id = %process.id,
                    candidate_id = %membership.candidate_id,
                    stage = %membership.stage_id,
                    "stage SLA breached"
                );
                breaches += 1;
                // The bus delivers this too; the execution key makes that a no-op.
                self.engine.evaluate_event_at(&activity, now).await?;
            }
        }
        Ok(breaches)
    }

    async fn breach_recorded(&self, membership: &ProcessMembership) -> Result<bool> {
        let activities = self
            .engine
            .pipeline()
            .activity_log()
            .for_candidate(membership.candidate_id)
            .await?;
        Ok(activities.iter().any(|a| {
            matches!(
                &a.kind,
                ActivityKind::SlaBreached { process_id, stage_id, entered_stage_at }
                    if *process_id == membership.process_id
                        && *stage_id == membership.stage_id
                        && *entered_stage_at == membership.entered_stage_at
            )
        }))
    }

    async fn fire_time_based(&self, now: DateTime<Utc>) -> Result<usize> {
        let workflows = self.engine.list_workflows().await?;
        let mut fired = 0;
        for workflow in workflows.iter().filter(|w| w.active) {
            let firings = match &workflow.trigger {
                Trigger::DaysInStage {
                    process_id,
                    stage_id,
                    days,
                } => {
                    self.days_in_stage(*process_id, stage_id.as_ref(), *days, now)
                        .await?
                }
                Trigger::NoActivity { days } => self.no_activity(*days, now).await?,
                _ => continue,
            };
            for (candidate_id, firing) in firings {
                match self.engine.fire(workflow, candidate_id, firing, now).await {
                    Ok(Some(_)) => fired += 1,
                    Ok(None) => {}
                    Err(e) => {
                        error!(workflow_id = %workflow.id, %candidate_id, "scheduled firing failed: {e}")
                    }
                }
            }
        }
        Ok(fired)
    }

    async fn days_in_stage(
        &self,
        process_filter: Option<ProcessId>,
        stage_filter: Option<&StageId>,
        days: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<(CandidateId, Firing)>> {
        let pipeline = self.engine.pipeline();
        let threshold = Duration::days(i64::from(days));
        let mut firings = Vec::new();
        for process in pipeline.list_processes().await? {
            if !process.is_open() || process_filter.is_some_and(|p| p != process.id) {
                continue;
            }
            for m in pipeline.process_members(process.id).await? {
                if stage_filter.is_some_and(|s| *s != m.stage_id) {
                    continue;
                }
                let Some(anchor_at) = m.entered_stage_at.checked_add_signed(threshold) else {
                    continue;
                };
                if anchor_at > now {
                    continue;
                }
                firings.push((
                    m.candidate_id,
                    Firing {
                        key: format!(
                            "days_in_stage:{}:{}:{}",
                            m.process_id,
                            m.stage_id,
                            m.entered_stage_at.timestamp_millis()
                        ),
                        activity_id: None,
                        anchor_at,
                        depth: 0,
                    },
                ));
            }
        }
        Ok(firings)
    }

    async fn no_activity(&self, days: u32, now: DateTime<Utc>) -> Result<Vec<(CandidateId, Firing)>> {
        let pipeline = self.engine.pipeline();
        let threshold = Duration::days(i64::from(days));
        let mut firings = Vec::new();
        for candidate in pipeline.list_candidates().await? {
            if candidate.status.is_terminal() {
                continue;
            }
            let last = pipeline.activity_log().last_engagement(candidate.id).await?;
            let (since, marker) = match &last {
                Some(a) => (a.timestamp, a.id.to_string()),
                None => (candidate.created_at, "created".to_string()),
            };
            let Some(anchor_at) = since.checked_add_signed(threshold) else {
                continue;
            };
            if anchor_at > now {
                continue;
            }
            firings.push((
                candidate.id,
                Firing {
                    key: format!("no_activity:{days}:{marker}"),
                    activity_id: last.as_ref().map(|a| a.id),
                    anchor_at,
                    depth: 0,
                },
            ));
        }
        Ok(firings)
    }
}
