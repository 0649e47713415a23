//! Workflow definitions from a directory of TOML files.
//!
//! One workflow per file. Files are read in name order so registration order
//! (and therefore evaluation order) is stable across runs.

use std::path::Path;

use tracing::info;

use super::WorkflowEngine;
use crate::error::{Error, Result};
use crate::model::{NewWorkflow, WorkflowId};

/// Parse and validate every `.toml` file in `dir`.
pub fn load_from_dir(dir: &Path) -> Result<Vec<NewWorkflow>> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| Error::Config(format!("cannot read workflow dir {}: {e}", dir.display())))?;

    let mut paths = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "toml") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut workflows = Vec::with_capacity(paths.len());
    for path in paths {
        let content = std::fs::read_to_string(&path)?;
        let workflow = parse(&content)
            .map_err(|e| Error::Config(format!("bad workflow {}: {e}", path.display())))?;
        workflows.push(workflow);
    }
    Ok(workflows)
}

/// Parse one definition.
pub fn parse(content: &str) -> Result<NewWorkflow> {
    let workflow: NewWorkflow =
        toml::from_str(content).map_err(|e| Error::Validation(e.to_string()))?;
    workflow.validate()?;
    Ok(workflow)
}

/// Register each definition, or update the workflow of the same name if one
/// is already installed.
pub async fn install(
    engine: &WorkflowEngine,
    definitions: Vec<NewWorkflow>,
) -> Result<Vec<WorkflowId>> {
    let existing = engine.list_workflows().await?;
    let mut ids = Vec::with_capacity(definitions.len());
    for definition in definitions {
        let id = match existing.iter().find(|w| w.name == definition.name) {
            Some(current) => engine.update_workflow(current.id, definition).await?.id,
            None => engine.register_workflow(definition).await?,
        };
        ids.push(id);
    }
    info!(count = ids.len(), "workflows installed");
    Ok(ids)
}
