//! Instance snapshots
//!
//! An operation loads everything it needs about one instance into an
//! [`InstanceSnapshot`], mutates the snapshot in memory, and turns the
//! touched records into a single [`ChangeSet`]. A failed operation simply
//! drops its snapshot, so nothing it did reaches the store.

use crate::store::{ChangeSet, Store};
use docflow_types::{
    FileArena, InstanceDecisionOutcome, InstanceFile, InstanceTask, InstanceTaskId, TaskDefinition,
    TaskDefinitionId, WorkflowDefinition, WorkflowError, WorkflowInstance, WorkflowInstanceId,
    WorkflowResult,
};
use std::collections::BTreeSet;

/// In-memory working copy of one instance
#[derive(Clone, Debug)]
pub struct InstanceSnapshot {
    pub definition: WorkflowDefinition,
    instance: WorkflowInstance,
    /// Sorted by sequence order, then task definition id
    tasks: Vec<InstanceTask>,
    files: FileArena,
    decisions: Vec<InstanceDecisionOutcome>,
    instance_dirty: bool,
    dirty_tasks: BTreeSet<InstanceTaskId>,
    new_files: Vec<InstanceFile>,
    new_decisions: Vec<InstanceDecisionOutcome>,
}

impl InstanceSnapshot {
    /// Load an instance with its definition, tasks, files and decisions
    pub async fn load(store: &dyn Store, id: &WorkflowInstanceId) -> WorkflowResult<Self> {
        let instance = store
            .get_instance(id)
            .await?
            .ok_or_else(|| WorkflowError::InstanceNotFound(id.clone()))?;
        let definition = store
            .get_definition(&instance.definition_id)
            .await?
            .ok_or_else(|| WorkflowError::DefinitionNotFound(instance.definition_id.clone()))?;
        let tasks = store.list_instance_tasks_by_instance(id).await?;
        let files = store.list_instance_files_by_instance(id).await?;
        let decisions = store.list_decisions_by_instance(id).await?;
        Ok(Self::assemble(definition, instance, tasks, files, decisions))
    }

    /// A snapshot of an instance that has not been stored yet. Every record
    /// in it counts as changed.
    pub fn fresh(
        definition: WorkflowDefinition,
        instance: WorkflowInstance,
        tasks: Vec<InstanceTask>,
    ) -> Self {
        let mut snapshot = Self::assemble(definition, instance, tasks, Vec::new(), Vec::new());
        snapshot.instance_dirty = true;
        snapshot.dirty_tasks = snapshot.tasks.iter().map(|t| t.id.clone()).collect();
        snapshot
    }

    fn assemble(
        definition: WorkflowDefinition,
        instance: WorkflowInstance,
        mut tasks: Vec<InstanceTask>,
        files: Vec<InstanceFile>,
        decisions: Vec<InstanceDecisionOutcome>,
    ) -> Self {
        tasks.sort_by(|a, b| {
            a.sequence_order
                .cmp(&b.sequence_order)
                .then_with(|| a.task_definition_id.cmp(&b.task_definition_id))
        });
        Self {
            definition,
            instance,
            tasks,
            files: FileArena::from_files(files),
            decisions,
            instance_dirty: false,
            dirty_tasks: BTreeSet::new(),
            new_files: Vec::new(),
            new_decisions: Vec::new(),
        }
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn instance(&self) -> &WorkflowInstance {
        &self.instance
    }

    pub fn tasks(&self) -> &[InstanceTask] {
        &self.tasks
    }

    pub fn files(&self) -> &FileArena {
        &self.files
    }

    pub fn decisions(&self) -> &[InstanceDecisionOutcome] {
        &self.decisions
    }

    pub fn task(&self, id: &InstanceTaskId) -> WorkflowResult<&InstanceTask> {
        self.tasks
            .iter()
            .find(|t| &t.id == id)
            .ok_or_else(|| WorkflowError::TaskNotFound(id.clone()))
    }

    pub fn task_for_definition(&self, id: &TaskDefinitionId) -> Option<&InstanceTask> {
        self.tasks.iter().find(|t| &t.task_definition_id == id)
    }

    /// The definition an instance task was materialized from
    pub fn definition_of(&self, id: &InstanceTaskId) -> WorkflowResult<&TaskDefinition> {
        let task = self.task(id)?;
        self.definition
            .task(&task.task_definition_id)
            .ok_or_else(|| WorkflowError::TaskDefinitionNotFound(task.task_definition_id.clone()))
    }

    /// Fail unless the instance still accepts mutations
    pub fn ensure_mutable(&self) -> WorkflowResult<()> {
        if self.instance.is_terminal() {
            return Err(WorkflowError::invalid_transition(
                &self.instance.id,
                "a non-terminal instance",
                self.instance.status,
            ));
        }
        Ok(())
    }

    // ── Writes ───────────────────────────────────────────────────────

    pub fn instance_mut(&mut self) -> &mut WorkflowInstance {
        self.instance_dirty = true;
        &mut self.instance
    }

    pub fn task_mut(&mut self, id: &InstanceTaskId) -> WorkflowResult<&mut InstanceTask> {
        let task = self
            .tasks
            .iter_mut()
            .find(|t| &t.id == id)
            .ok_or_else(|| WorkflowError::TaskNotFound(id.clone()))?;
        self.dirty_tasks.insert(id.clone());
        Ok(task)
    }

    /// Visit every task; only tasks for which `apply` returns true are
    /// recorded as changed.
    pub fn update_tasks(&mut self, mut apply: impl FnMut(&mut InstanceTask) -> bool) {
        for task in &mut self.tasks {
            if apply(task) {
                self.dirty_tasks.insert(task.id.clone());
            }
        }
    }

    /// Add a new file version
    pub fn add_file(&mut self, file: InstanceFile) -> WorkflowResult<()> {
        self.files
            .insert(file.clone())
            .map_err(|existing| WorkflowError::FileActionRejected {
                task: file.task_id.clone(),
                reason: format!("file version {} already exists", existing),
            })?;
        self.new_files.push(file);
        Ok(())
    }

    pub fn add_decision(&mut self, decision: InstanceDecisionOutcome) {
        self.decisions.push(decision.clone());
        self.new_decisions.push(decision);
    }

    pub fn is_dirty(&self) -> bool {
        self.instance_dirty
            || !self.dirty_tasks.is_empty()
            || !self.new_files.is_empty()
            || !self.new_decisions.is_empty()
    }

    /// Everything changed since loading
    pub fn into_change_set(self) -> ChangeSet {
        let dirty = self.dirty_tasks;
        ChangeSet {
            instance: self.instance_dirty.then_some(self.instance),
            tasks: self
                .tasks
                .into_iter()
                .filter(|t| dirty.contains(&t.id))
                .collect(),
            files: self.new_files,
            decisions: self.new_decisions,
        }
    }
}
