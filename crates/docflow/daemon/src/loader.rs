//! Workflow definition loading
//!
//! Definitions are JSON documents, one per `*.json` file. Files are read in
//! name order so registration is deterministic.

use anyhow::Context;
use docflow_engine::WorkflowEngine;
use docflow_types::{WorkflowDefinition, WorkflowDefinitionId};
use std::path::{Path, PathBuf};

/// Parse every `*.json` file in `dir`
pub fn load_definitions(dir: &Path) -> anyhow::Result<Vec<WorkflowDefinition>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read definitions directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    let mut definitions = Vec::with_capacity(paths.len());
    for path in paths {
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let definition = WorkflowDefinition::from_json(&text)
            .with_context(|| format!("Invalid workflow definition in {}", path.display()))?;
        tracing::debug!(
            path = %path.display(),
            definition_id = %definition.id,
            tasks = definition.task_count(),
            "Loaded workflow definition"
        );
        definitions.push(definition);
    }
    Ok(definitions)
}

/// Register definitions with the engine. Stops at the first invalid one.
pub async fn register_definitions(
    engine: &WorkflowEngine,
    definitions: Vec<WorkflowDefinition>,
) -> anyhow::Result<Vec<WorkflowDefinitionId>> {
    let mut ids = Vec::with_capacity(definitions.len());
    for definition in definitions {
        let name = definition.name.clone();
        let id = engine
            .register_definition(definition)
            .await
            .with_context(|| format!("Failed to register workflow definition '{}'", name))?;
        ids.push(id);
    }
    Ok(ids)
}
