//! Dependency resolver: which files a task may see and use
//!
//! A task's visible files are the current versions of every file its
//! source tasks produced. Source references are checked for shape when a
//! definition is registered; this resolver only checks that the sources
//! have actually produced something.

use crate::snapshot::InstanceSnapshot;
use docflow_types::*;
use std::collections::{BTreeMap, BTreeSet};

/// Resolves file visibility across task boundaries
#[derive(Clone, Debug, Default)]
pub struct DependencyResolver;

impl DependencyResolver {
    pub fn new() -> Self {
        Self
    }

    /// Current versions of all files produced by the task's source tasks
    pub fn available_files(
        &self,
        snapshot: &InstanceSnapshot,
        task_id: &InstanceTaskId,
    ) -> WorkflowResult<Vec<InstanceFile>> {
        let definition = snapshot.definition_of(task_id)?;
        let mut union: BTreeMap<InstanceFileId, InstanceFile> = BTreeMap::new();

        for source in &definition.source_task_ids {
            let Some(upstream) = snapshot.task_for_definition(source) else {
                continue;
            };
            for file in snapshot.files().visible_from(&upstream.id) {
                union
                    .entry(file.instance_file_id.clone())
                    .or_insert_with(|| file.clone());
            }
        }

        tracing::debug!(
            task_id = %task_id,
            files = union.len(),
            "Resolved available files"
        );
        Ok(union.into_values().collect())
    }

    /// Check that every source task is materialized and has produced at
    /// least one file
    pub fn validate(
        &self,
        snapshot: &InstanceSnapshot,
        task_id: &InstanceTaskId,
    ) -> WorkflowResult<()> {
        let definition = snapshot.definition_of(task_id)?;
        let mut missing = Vec::new();
        let mut unmaterialized = false;

        for source in &definition.source_task_ids {
            match snapshot.task_for_definition(source) {
                None => {
                    unmaterialized = true;
                    missing.push(source.clone());
                }
                Some(upstream) => {
                    if snapshot.files().produced_by(&upstream.id).is_empty() {
                        missing.push(source.clone());
                    }
                }
            }
        }

        if missing.is_empty() {
            return Ok(());
        }

        let names = missing
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let reason = if unmaterialized {
            format!("source tasks not part of the instance: {}", names)
        } else {
            format!("source tasks have produced no files: {}", names)
        };
        Err(WorkflowError::DependencyUnmet {
            task: task_id.clone(),
            missing,
            reason,
        })
    }

    /// Whether [`validate`](Self::validate) would pass
    pub fn is_satisfied(&self, snapshot: &InstanceSnapshot, task_id: &InstanceTaskId) -> bool {
        self.validate(snapshot, task_id).is_ok()
    }

    /// Files the task may act on: its available files plus its own
    pub fn legal_inputs(
        &self,
        snapshot: &InstanceSnapshot,
        task_id: &InstanceTaskId,
    ) -> WorkflowResult<BTreeSet<InstanceFileId>> {
        let mut ids: BTreeSet<InstanceFileId> = self
            .available_files(snapshot, task_id)?
            .into_iter()
            .map(|f| f.instance_file_id)
            .collect();
        ids.extend(snapshot.files().produced_by(task_id));
        Ok(ids)
    }

    /// Check that the task may introduce a brand new file
    pub fn ensure_new_files_allowed(
        &self,
        snapshot: &InstanceSnapshot,
        task_id: &InstanceTaskId,
    ) -> WorkflowResult<()> {
        let definition = snapshot.definition_of(task_id)?;
        if definition.allow_new_files {
            Ok(())
        } else {
            Err(WorkflowError::FileActionRejected {
                task: task_id.clone(),
                reason: "task may only act on files from its source tasks".into(),
            })
        }
    }

    /// Check that an existing file is inside the task's legal input set
    pub fn ensure_legal_input(
        &self,
        snapshot: &InstanceSnapshot,
        task_id: &InstanceTaskId,
        file_id: &InstanceFileId,
    ) -> WorkflowResult<()> {
        if self.legal_inputs(snapshot, task_id)?.contains(file_id) {
            Ok(())
        } else {
            Err(WorkflowError::FileActionRejected {
                task: task_id.clone(),
                reason: format!("file {} is not visible to this task", file_id),
            })
        }
    }
}
