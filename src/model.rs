//! Core data model.
//!
//! Candidates, processes, workflows, executions and activities are independent
//! collections that reference each other by id only. Nothing here owns another
//! entity; the store and the pipeline tie them together.

pub mod activity;
pub mod candidate;
pub mod execution;
pub mod process;
pub mod workflow;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use activity::{Activity, ActivityKind};
pub use candidate::{Candidate, CandidateSource, CandidateStatus, ExperienceLevel, NewCandidate};
pub use execution::{ActionResult, ActionStatus, ExecutionState, SkipReason, WorkflowExecution};
pub use process::{NewProcess, Process, ProcessMembership, ProcessState, Stage, StageMetrics};
pub use workflow::{
    Action, ExecutionLimits, FailurePolicy, NewWorkflow, Trigger, TriggerFilter, Workflow,
    WorkflowStep,
};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Candidate identifier.
    CandidateId
);
uuid_id!(
    /// Hiring process (pipeline instance) identifier.
    ProcessId
);
uuid_id!(
    /// Workflow rule identifier.
    WorkflowId
);
uuid_id!(
    /// Workflow execution identifier. Re-delivery of deferred work is keyed on it.
    ExecutionId
);
uuid_id!(ActivityId);

/// Stage identifier, unique within its process (e.g. "screening").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageId(pub String);

impl StageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A recruiter or admin, identified by the external auth system's subject.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

/// Who caused an activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Actor {
    User(UserId),
    Workflow(WorkflowId),
    /// Periodic scans and other engine-internal writers.
    System,
}

impl Actor {
    pub fn user(id: impl Into<String>) -> Self {
        Actor::User(UserId::new(id))
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Actor::User(id) => write!(f, "user:{id}"),
            Actor::Workflow(id) => write!(f, "workflow:{id}"),
            Actor::System => f.write_str("system"),
        }
    }
}
