//! Span helpers for workflow executions and periodic scans.

use tracing::Span;

use crate::model::{CandidateId, ExecutionId};

/// Start a span covering one run of a workflow execution.
///
/// The `execution.state` field is declared empty and filled in by
/// [`record_state_transition`].
pub fn start_execution_span(
    workflow: &str,
    execution_id: ExecutionId,
    candidate_id: CandidateId,
) -> Span {
    tracing::info_span!(
        "workflow.execute",
        "workflow.name" = workflow,
        "execution.id" = %execution_id,
        "candidate.id" = %candidate_id,
        "execution.state" = tracing::field::Empty,
    )
}

/// Start a span for one pass of the periodic scan.
pub fn start_scan_span() -> Span {
    tracing::info_span!(
        "pipeline.scan",
        "scan.fired" = tracing::field::Empty,
        "scan.breaches" = tracing::field::Empty,
    )
}

/// Record an execution state transition on the given span.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.record("execution.state", to);
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "state_transition");
    });
}
