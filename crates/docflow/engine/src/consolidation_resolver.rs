//! Consolidation resolver: selecting and merging files
//!
//! Candidates are the files visible from the source tasks plus files the
//! consolidation task uploaded itself. Manual selections are
//! checked against the candidate set and the policy bounds; automatic
//! selections apply the policy's strategy first and the bounds after.

use crate::dependency_resolver::DependencyResolver;
use crate::snapshot::InstanceSnapshot;
use chrono::{DateTime, Utc};
use docflow_types::*;
use serde::Serialize;
use std::collections::HashSet;

/// What a consolidation task would work with, without changing anything
#[derive(Clone, Debug, Serialize)]
pub struct ConsolidationPreview {
    pub task_id: InstanceTaskId,
    pub candidates: Vec<InstanceFile>,
    pub mode: ConsolidationMode,
    pub strategy: SelectionStrategy,
    pub min_file_selections: u32,
    pub max_file_selections: Option<u32>,
    /// What automatic consolidation would pick, when it is allowed
    pub auto_selection: Option<Vec<InstanceFileId>>,
}

/// Selects and validates consolidation inputs
#[derive(Clone, Debug, Default)]
pub struct ConsolidationResolver {
    dependencies: DependencyResolver,
}

impl ConsolidationResolver {
    pub fn new(dependencies: DependencyResolver) -> Self {
        Self { dependencies }
    }

    /// Candidate files and policy bounds for a consolidation task
    pub fn preview(
        &self,
        snapshot: &InstanceSnapshot,
        task_id: &InstanceTaskId,
    ) -> WorkflowResult<ConsolidationPreview> {
        let policy = self.policy(snapshot, task_id)?;
        let candidates = self.candidates(snapshot, task_id)?;
        let auto_selection = policy.allows_auto().then(|| {
            Self::apply_strategy(&policy, &candidates)
                .into_iter()
                .map(|f| f.instance_file_id.clone())
                .collect()
        });

        Ok(ConsolidationPreview {
            task_id: task_id.clone(),
            mode: policy.mode,
            strategy: policy.strategy,
            min_file_selections: policy.min_file_selections,
            max_file_selections: policy.max_file_selections,
            auto_selection,
            candidates,
        })
    }

    /// Validate a caller's selection
    pub fn select_manual(
        &self,
        snapshot: &InstanceSnapshot,
        task_id: &InstanceTaskId,
        selected: &[InstanceFileId],
    ) -> WorkflowResult<Vec<InstanceFile>> {
        let policy = self.policy(snapshot, task_id)?;
        if !policy.allows_manual() {
            return Err(WorkflowError::invalid_transition(
                task_id,
                "a MANUAL or HYBRID consolidation policy",
                policy.mode,
            ));
        }

        let mut seen = HashSet::new();
        if let Some(dup) = selected.iter().find(|id| !seen.insert(*id)) {
            return Err(WorkflowError::FileActionRejected {
                task: task_id.clone(),
                reason: format!("file {} selected more than once", dup),
            });
        }

        let candidates = self.candidates(snapshot, task_id)?;
        let mut selection = Vec::with_capacity(selected.len());
        for id in selected {
            match candidates.iter().find(|f| &f.instance_file_id == id) {
                Some(file) => selection.push(file.clone()),
                None => {
                    return Err(WorkflowError::FileActionRejected {
                        task: task_id.clone(),
                        reason: format!("file {} is not a consolidation candidate", id),
                    })
                }
            }
        }

        Self::check_bounds(&policy, selection.len())?;
        Ok(selection)
    }

    /// Let the policy choose the inputs
    pub fn select_auto(
        &self,
        snapshot: &InstanceSnapshot,
        task_id: &InstanceTaskId,
    ) -> WorkflowResult<Vec<InstanceFile>> {
        let policy = self.policy(snapshot, task_id)?;
        if !policy.allows_auto() {
            return Err(WorkflowError::invalid_transition(
                task_id,
                "an AUTO or HYBRID consolidation policy",
                policy.mode,
            ));
        }

        let candidates = self.candidates(snapshot, task_id)?;
        let selection: Vec<InstanceFile> = Self::apply_strategy(&policy, &candidates)
            .into_iter()
            .cloned()
            .collect();
        Self::check_bounds(&policy, selection.len())?;
        Ok(selection)
    }

    /// The consolidated artifact for a validated selection
    pub fn build_artifact(
        &self,
        snapshot: &InstanceSnapshot,
        task_id: &InstanceTaskId,
        selection: &[InstanceFile],
        notes: Option<String>,
        actor: &Identity,
        now: DateTime<Utc>,
    ) -> WorkflowResult<InstanceFile> {
        let task = snapshot.task(task_id)?;
        let file_id = InstanceFileId::generate();
        Ok(InstanceFile {
            file_name: format!("consolidated-{}", file_id.short()),
            instance_file_id: file_id,
            version: 1,
            instance_id: task.instance_id.clone(),
            task_id: task.id.clone(),
            task_definition_id: task.task_definition_id.clone(),
            action: FileAction::Consolidate,
            created_by: actor.clone(),
            created_at: now,
            derived_from: selection.iter().map(InstanceFile::version_ref).collect(),
            notes,
        })
    }

    /// Source files, then the task's own uploads. Earlier consolidated
    /// artifacts of the task are not inputs.
    fn candidates(
        &self,
        snapshot: &InstanceSnapshot,
        task_id: &InstanceTaskId,
    ) -> WorkflowResult<Vec<InstanceFile>> {
        let mut candidates = self.dependencies.available_files(snapshot, task_id)?;
        for file in snapshot.files().visible_from(task_id) {
            if file.action != FileAction::Consolidate
                && !candidates
                    .iter()
                    .any(|c| c.instance_file_id == file.instance_file_id)
            {
                candidates.push(file.clone());
            }
        }
        Ok(candidates)
    }

    fn policy(
        &self,
        snapshot: &InstanceSnapshot,
        task_id: &InstanceTaskId,
    ) -> WorkflowResult<ConsolidationPolicy> {
        let definition = snapshot.definition_of(task_id)?;
        if definition.kind != TaskKind::Consolidate {
            return Err(WorkflowError::FileActionRejected {
                task: task_id.clone(),
                reason: format!("{:?} task cannot consolidate", definition.kind),
            });
        }
        Ok(definition.consolidation.clone())
    }

    fn apply_strategy<'a>(
        policy: &ConsolidationPolicy,
        candidates: &'a [InstanceFile],
    ) -> Vec<&'a InstanceFile> {
        let mut ordered: Vec<&InstanceFile> = candidates.iter().collect();
        match policy.strategy {
            SelectionStrategy::All => ordered,
            SelectionStrategy::NewestFirst => {
                ordered.sort_by(|a, b| {
                    b.created_at
                        .cmp(&a.created_at)
                        .then_with(|| a.instance_file_id.cmp(&b.instance_file_id))
                });
                if let Some(max) = policy.max_file_selections {
                    ordered.truncate(max as usize);
                }
                ordered
            }
        }
    }

    fn check_bounds(policy: &ConsolidationPolicy, count: usize) -> WorkflowResult<()> {
        if policy.accepts(count) {
            Ok(())
        } else {
            Err(WorkflowError::SelectionOutOfBounds {
                selected: count,
                min: policy.min_file_selections,
                max: policy.max_file_selections,
            })
        }
    }
}
