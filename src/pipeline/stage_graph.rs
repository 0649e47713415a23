//! Per-process stage graph.
//!
//! Without declared adjacency the graph is open: any stage may move to any
//! other stage of the same process.

use crate::model::{Process, Stage, StageId};

pub struct StageGraph<'a> {
    process: &'a Process,
}

impl<'a> StageGraph<'a> {
    pub fn new(process: &'a Process) -> Self {
        Self { process }
    }

    /// Stages in pipeline order.
    pub fn stages(&self) -> &'a [Stage] {
        &self.process.stages
    }

    pub fn is_open(&self) -> bool {
        self.process.transitions.is_none()
    }

    /// A stage outside the process is never a legal endpoint.
    pub fn is_legal(&self, from: &StageId, to: &StageId) -> bool {
        if !self.process.has_stage(from) || !self.process.has_stage(to) {
            return false;
        }
        match &self.process.transitions {
            None => true,
            Some(edges) => edges.get(from).is_some_and(|targets| targets.contains(to)),
        }
    }

    /// Stages reachable in one move from `from`, in pipeline order.
    pub fn targets(&self, from: &StageId) -> Vec<&'a Stage> {
        self.stages()
            .iter()
            .filter(|stage| &stage.id != from && self.is_legal(from, &stage.id))
            .collect()
    }
}
