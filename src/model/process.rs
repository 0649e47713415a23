//! Hiring processes: ordered stages, optional stage adjacency, memberships.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CandidateId, ProcessId, StageId};
use crate::error::{Error, Result};

/// A named pipeline instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Process {
    pub id: ProcessId,
    pub name: String,
    pub description: Option<String>,
    pub state: ProcessState,

    /// Sorted by `order`.
    pub stages: Vec<Stage>,

    /// Allowed stage moves. `None` means any stage may move to any stage.
    pub transitions: Option<BTreeMap<StageId, BTreeSet<StageId>>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Process {
    pub fn stage(&self, id: &StageId) -> Option<&Stage> {
        self.stages.iter().find(|s| &s.id == id)
    }

    pub fn has_stage(&self, id: &StageId) -> bool {
        self.stage(id).is_some()
    }

    /// Whether membership changes are still accepted.
    pub fn is_open(&self) -> bool {
        matches!(self.state, ProcessState::Draft | ProcessState::Active)
    }
}

/// One step of a process pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub id: StageId,
    pub name: String,
    pub order: u32,
    /// Time-in-stage target. `None` opts the stage out of SLA tracking.
    #[serde(default)]
    pub sla_hours: Option<u32>,
}

impl Stage {
    pub fn new(id: impl Into<String>, name: impl Into<String>, order: u32) -> Self {
        Self {
            id: StageId::new(id),
            name: name.into(),
            order,
            sla_hours: None,
        }
    }

    pub fn sla_hours(mut self, hours: u32) -> Self {
        self.sla_hours = Some(hours);
        self
    }
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Draft,
    Active,
    Completed,
    Archived,
}

impl ProcessState {
    pub fn can_transition_to(self, to: ProcessState) -> bool {
        use ProcessState::*;
        matches!(
            (self, to),
            (Draft, Active)
                | (Draft, Archived)
                | (Active, Completed)
                | (Active, Archived)
                | (Completed, Archived)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProcessState::Draft => "draft",
            ProcessState::Active => "active",
            ProcessState::Completed => "completed",
            ProcessState::Archived => "archived",
        }
    }
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProcessState {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "draft" => Ok(ProcessState::Draft),
            "active" => Ok(ProcessState::Active),
            "completed" => Ok(ProcessState::Completed),
            "archived" => Ok(ProcessState::Archived),
            other => Err(Error::Validation(format!("unknown process state: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Membership
// ---------------------------------------------------------------------------

/// A candidate's position inside one process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessMembership {
    pub process_id: ProcessId,
    pub candidate_id: CandidateId,
    pub stage_id: StageId,
    pub entered_stage_at: DateTime<Utc>,
    pub added_at: DateTime<Utc>,
}

/// Candidate counts per stage, always computed from current memberships.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageMetrics {
    pub process_id: ProcessId,
    /// In stage order; stages without members are listed with zero.
    pub per_stage: Vec<(StageId, usize)>,
    pub total: usize,
}

impl StageMetrics {
    pub fn compute(process: &Process, memberships: &[ProcessMembership]) -> Self {
        let per_stage: Vec<(StageId, usize)> = process
            .stages
            .iter()
            .map(|stage| {
                let count = memberships
                    .iter()
                    .filter(|m| m.process_id == process.id && m.stage_id == stage.id)
                    .count();
                (stage.id.clone(), count)
            })
            .collect();
        let total = per_stage.iter().map(|(_, n)| n).sum();
        Self {
            process_id: process.id,
            per_stage,
            total,
        }
    }

    pub fn count(&self, stage: &StageId) -> usize {
        self.per_stage
            .iter()
            .find(|(id, _)| id == stage)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for a new process. Processes start as drafts.
#[derive(Debug, Clone)]
pub struct NewProcess {
    pub(crate) name: String,
    pub(crate) description: Option<String>,
    pub(crate) stages: Vec<Stage>,
    pub(crate) transitions: Option<BTreeMap<StageId, BTreeSet<StageId>>>,
}

impl NewProcess {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            stages: Vec::new(),
            transitions: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Restrict stage moves. Once any edge is declared the graph is closed:
    /// only declared edges are legal.
    pub fn allow(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.transitions
            .get_or_insert_with(BTreeMap::new)
            .entry(StageId::new(from))
            .or_default()
            .insert(StageId::new(to));
        self
    }

    /// Check stage invariants and materialize the draft process.
    pub(crate) fn into_process(self, now: DateTime<Utc>) -> Result<Process> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("process name must not be empty".into()));
        }
        if self.stages.is_empty() {
            return Err(Error::Validation("process needs at least one stage".into()));
        }

        let mut ids = HashSet::new();
        let mut orders = HashSet::new();
        for stage in &self.stages {
            if !ids.insert(stage.id.clone()) {
                return Err(Error::Validation(format!("duplicate stage id: {}", stage.id)));
            }
            if !orders.insert(stage.order) {
                return Err(Error::Validation(format!(
                    "duplicate stage order {} (stage {})",
                    stage.order, stage.id
                )));
            }
        }

        if let Some(ref transitions) = self.transitions {
            for (from, targets) in transitions {
                for stage in std::iter::once(from).chain(targets) {
                    if !ids.contains(stage) {
                        return Err(Error::IllegalStage(format!(
                            "transition references unknown stage {stage}"
                        )));
                    }
                }
            }
        }

        let mut stages = self.stages;
        stages.sort_by_key(|s| s.order);

        Ok(Process {
            id: ProcessId::new(),
            name: self.name,
            description: self.description,
            state: ProcessState::Draft,
            stages,
            transitions: self.transitions,
            created_at: now,
            updated_at: now,
        })
    }
}
