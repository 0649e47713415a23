//! Metric instrument factories for talent-pipeline.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"talent-pipeline"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("talent-pipeline")
}

/// Counter: candidate status transitions applied.
/// Labels: `from`, `to`.
pub fn status_transitions() -> Counter<u64> {
    meter()
        .u64_counter("talent.candidate.status_transitions")
        .with_description("Number of candidate status transitions")
        .build()
}

/// Counter: rejected transition attempts.
/// Labels: `reason` ("invalid" | "conflict").
pub fn transitions_rejected() -> Counter<u64> {
    meter()
        .u64_counter("talent.candidate.transitions_rejected")
        .with_description("Number of rejected status transition requests")
        .build()
}

/// Counter: candidates moved between process stages.
/// Labels: `process`, `to`.
pub fn stage_moves() -> Counter<u64> {
    meter()
        .u64_counter("talent.process.stage_moves")
        .with_description("Number of stage moves inside processes")
        .build()
}

/// Counter: workflow executions reaching a terminal or paused state.
/// Labels: `workflow`, `state`.
pub fn workflow_executions() -> Counter<u64> {
    meter()
        .u64_counter("talent.workflow.executions")
        .with_description("Number of workflow executions by resulting state")
        .build()
}

/// Counter: individual workflow action attempts.
/// Labels: `action`, `result` ("succeeded" | "retrying" | "failed").
pub fn action_results() -> Counter<u64> {
    meter()
        .u64_counter("talent.workflow.action_results")
        .with_description("Number of workflow action attempts by result")
        .build()
}

/// Counter: SLA breaches detected by the scan.
/// Labels: `process`, `stage`.
pub fn sla_breaches() -> Counter<u64> {
    meter()
        .u64_counter("talent.sla.breaches")
        .with_description("Number of stage SLA breaches detected")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("talent.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
