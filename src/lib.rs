//! # talent-pipeline
//!
//! Candidate pipeline core for a recruiting applicant-tracking system.
//!
//! Provides the candidate status state machine, per-process stage graphs,
//! stage SLA tracking, a rule-based workflow engine reacting to an
//! append-only activity log, an in-memory store and a Postgres adapter, and
//! OpenTelemetry observability.

pub mod activity;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod store;
pub mod telemetry;
pub mod workflow;
