//! Shared fixtures for component tests

use crate::snapshot::InstanceSnapshot;
use crate::task_sequencer::TaskSequencer;
use chrono::{DateTime, Utc};
use docflow_types::*;
use std::collections::HashMap;

pub(crate) fn role(name: &str) -> RoleId {
    RoleId::new(name)
}

/// upload(1) → update(2) ∥ update(3) → consolidate(4) → decision(5)
pub(crate) fn review_definition() -> WorkflowDefinition {
    let mut wf = WorkflowDefinition::with_id(WorkflowDefinitionId::new("review"), "Review");
    wf.add_task(TaskDefinition::upload("1", 1, role("author")))
        .unwrap();
    wf.add_task(
        TaskDefinition::update("2", 2, role("editor"))
            .with_sources(["1"])
            .with_new_files(false)
            .in_group("edit")
            .revisitable(1),
    )
    .unwrap();
    wf.add_task(
        TaskDefinition::update("3", 2, role("legal"))
            .with_sources(["1"])
            .in_group("edit")
            .revisitable(1),
    )
    .unwrap();
    wf.add_task(
        TaskDefinition::consolidate("4", 3, role("editor"))
            .with_sources(["2", "3"])
            .with_consolidation(
                ConsolidationPolicy::new(ConsolidationMode::Hybrid).with_bounds(2, Some(5)),
            )
            .revisitable(1),
    )
    .unwrap();
    wf.add_task(
        TaskDefinition::decision("5", 4, role("approver"))
            .with_outcome(DecisionOutcome::advance("APPROVED"))
            .with_outcome(DecisionOutcome::selective("NEEDS_REVISION", ["2", "3"]))
            .with_outcome(DecisionOutcome::cascade("START_OVER", ["2"]))
            .revisitable(1),
    )
    .unwrap();
    wf.active = true;
    wf
}

/// A freshly started instance of `definition`, first stage eligible
pub(crate) fn snapshot_of(definition: WorkflowDefinition) -> InstanceSnapshot {
    let now = Utc::now();
    let instance = WorkflowInstance::new(
        definition.id.clone(),
        definition.version,
        Identity::new("starter"),
        now,
    );
    let sequencer = TaskSequencer::default();
    let tasks = sequencer.materialize(&definition, &instance, &HashMap::new(), None, now);
    let mut snapshot = InstanceSnapshot::fresh(definition, instance, tasks);
    sequencer.refresh(&mut snapshot, now);
    snapshot
}

pub(crate) fn task_id(snapshot: &InstanceSnapshot, definition_id: &str) -> InstanceTaskId {
    snapshot
        .task_for_definition(&TaskDefinitionId::new(definition_id))
        .map(|t| t.id.clone())
        .unwrap()
}

/// Record a file version produced by the task for `definition_id`
pub(crate) fn add_file(
    snapshot: &mut InstanceSnapshot,
    definition_id: &str,
    file_id: &str,
    version: u32,
    created_at: DateTime<Utc>,
) -> InstanceFile {
    let task = snapshot
        .task_for_definition(&TaskDefinitionId::new(definition_id))
        .cloned()
        .unwrap();
    let file = InstanceFile {
        instance_file_id: InstanceFileId::new(file_id),
        version,
        instance_id: task.instance_id.clone(),
        task_id: task.id.clone(),
        task_definition_id: task.task_definition_id.clone(),
        action: if version == 1 {
            FileAction::Upload
        } else {
            FileAction::Update
        },
        file_name: format!("{}.docx", file_id),
        created_by: Identity::new("alice"),
        created_at,
        derived_from: Vec::new(),
        notes: None,
    };
    snapshot.add_file(file.clone()).unwrap();
    file
}

/// Force a task into a status, bypassing the lifecycle
pub(crate) fn force_status(snapshot: &mut InstanceSnapshot, definition_id: &str, status: TaskStatus) {
    let id = task_id(snapshot, definition_id);
    let task = snapshot.task_mut(&id).unwrap();
    task.status = status;
    if status == TaskStatus::InProgress {
        task.started_on = Some(Utc::now());
    }
}
