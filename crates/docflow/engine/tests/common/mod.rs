//! Shared fixtures for engine integration tests

#![allow(dead_code)]

use docflow_engine::*;
use docflow_types::*;
use std::sync::Arc;

pub struct Harness {
    pub engine: Arc<WorkflowEngine>,
    pub store: Arc<InMemoryStore>,
}

pub fn directory() -> StaticDirectory {
    StaticDirectory::new()
        .with_member("author", "alice")
        .with_member("editor", "ed")
        .with_member("legal", "lee")
        .with_member("approver", "ann")
        .with_member("director", "dora")
        .with_escalation("ed", "lead")
        .with_fallback("ops")
}

pub fn calendar() -> WeekdayCalendar {
    WeekdayCalendar::new().with_calendar("business", CalendarRules::business_days())
}

pub fn harness() -> Harness {
    harness_with_directory(directory())
}

pub fn harness_with_directory(directory: StaticDirectory) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let engine = WorkflowEngine::new(store.clone(), Arc::new(directory), Arc::new(calendar()));
    Harness {
        engine: Arc::new(engine),
        store,
    }
}

fn role(name: &str) -> RoleId {
    RoleId::new(name)
}

/// upload(1) → update(2) ∥ update(3) → consolidate(4) → decision(5)
pub fn review_definition() -> WorkflowDefinition {
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
            .with_outcome(
                DecisionOutcome::selective("ESCALATE", ["3"]).with_auto_escalate(role("director")),
            )
            .revisitable(1),
    )
    .unwrap();
    wf.active = true;
    wf
}

/// `count` upload tasks in strict sequence
pub fn chain_definition(count: u32) -> WorkflowDefinition {
    let mut wf = WorkflowDefinition::with_id(WorkflowDefinitionId::new("chain"), "Chain");
    for order in 1..=count {
        wf.add_task(TaskDefinition::upload(format!("t{}", order), order, role("author")))
            .unwrap();
    }
    wf.active = true;
    wf
}

pub async fn start_review(harness: &Harness) -> InstanceView {
    let id = harness
        .engine
        .register_definition(review_definition())
        .await
        .unwrap();
    harness
        .engine
        .start_instance(&id, Identity::new("starter"))
        .await
        .unwrap()
}

pub fn task(view: &InstanceView, definition_id: &str) -> InstanceTaskId {
    view.task(definition_id).unwrap().id.clone()
}

/// Start and complete a non-decision task
pub async fn finish(engine: &WorkflowEngine, task: &InstanceTaskId) -> TaskTransition {
    engine.start_task(task).await.unwrap();
    engine.complete_task(task, None).await.unwrap()
}

/// Drive the review workflow up to, and including the start of, the decision
pub async fn drive_to_decision(harness: &Harness, view: &InstanceView) -> InstanceTaskId {
    let engine = &harness.engine;
    let alice = Identity::new("alice");

    let upload = task(view, "1");
    engine.start_task(&upload).await.unwrap();
    let draft = engine
        .upload_file(&upload, "draft.docx", alice.clone())
        .await
        .unwrap();
    engine.complete_task(&upload, None).await.unwrap();

    let editor = task(view, "2");
    engine.start_task(&editor).await.unwrap();
    engine
        .update_file(&editor, &draft.instance_file_id, Identity::new("ed"))
        .await
        .unwrap();
    engine.complete_task(&editor, None).await.unwrap();

    let legal = task(view, "3");
    engine.start_task(&legal).await.unwrap();
    engine
        .upload_file(&legal, "terms.docx", Identity::new("lee"))
        .await
        .unwrap();
    engine.complete_task(&legal, None).await.unwrap();

    let consolidate = task(view, "4");
    engine.start_task(&consolidate).await.unwrap();
    let preview = engine.preview_consolidation(&consolidate).await.unwrap();
    let selected: Vec<InstanceFileId> = preview
        .candidates
        .iter()
        .map(|f| f.instance_file_id.clone())
        .collect();
    engine
        .consolidate(&consolidate, &selected, None, Identity::new("ed"))
        .await
        .unwrap();

    let decision = task(view, "5");
    engine.start_task(&decision).await.unwrap();
    decision
}

/// Task statuses by definition id, in sequence order
pub async fn statuses(engine: &WorkflowEngine, instance: &WorkflowInstanceId) -> Vec<(String, TaskStatus)> {
    engine
        .get_instance(instance)
        .await
        .unwrap()
        .tasks
        .iter()
        .map(|t| (t.task_definition_id.to_string(), t.status))
        .collect()
}
