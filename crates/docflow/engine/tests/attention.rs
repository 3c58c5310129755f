//! Overdue detection, reminders and escalation through the engine

mod common;

use chrono::{Duration, Utc};
use common::*;
use docflow_engine::*;
use docflow_types::*;

fn timed_review() -> WorkflowDefinition {
    review_definition().with_timing(
        TimingPolicy::new()
            .escalate_after(60)
            .due_after(240)
            .remind_before(60),
    )
}

/// Editing stage of a timed review, both editors working
async fn editing(h: &Harness) -> InstanceView {
    let id = h.engine.register_definition(timed_review()).await.unwrap();
    let view = h
        .engine
        .start_instance(&id, Identity::new("starter"))
        .await
        .unwrap();
    let upload = task(&view, "1");
    h.engine.start_task(&upload).await.unwrap();
    h.engine
        .upload_file(&upload, "draft.docx", Identity::new("alice"))
        .await
        .unwrap();
    h.engine.complete_task(&upload, None).await.unwrap();
    h.engine.start_task(&task(&view, "2")).await.unwrap();
    h.engine.start_task(&task(&view, "3")).await.unwrap();
    view
}

#[tokio::test]
async fn test_overdue_detection() {
    let h = harness();
    let view = editing(&h).await;
    let now = Utc::now();

    assert!(h.engine.overdue_tasks(now).await.unwrap().is_empty());

    let later = now + Duration::minutes(90);
    let overdue = h.engine.overdue_tasks(later).await.unwrap();
    assert_eq!(overdue.len(), 2);
    assert!(overdue.iter().all(|i| i.kind == AttentionKind::Overdue));
    assert!(overdue.iter().all(|i| i.threshold_minutes == 60));

    let instances = h.engine.overdue_instances(later).await.unwrap();
    assert_eq!(instances.len(), 1);
    assert_eq!(instances[0].instance_id, view.instance.id);
}

#[tokio::test]
async fn test_reminders_before_due() {
    let h = harness();
    editing(&h).await;
    let now = Utc::now();

    assert!(h.engine.needing_reminder(now).await.unwrap().is_empty());
    let window = now + Duration::minutes(200);
    let reminders = h.engine.needing_reminder(window).await.unwrap();
    // Two tasks and the instance
    assert_eq!(reminders.len(), 3);

    let attention = h.engine.tasks_needing_attention(window).await.unwrap();
    assert_eq!(attention.len(), 4);
    assert!(attention.iter().all(|i| i.task_id().is_some()));
}

#[tokio::test]
async fn test_manual_escalation_is_idempotent() {
    let h = harness();
    let view = editing(&h).await;
    let editor = task(&view, "2");

    let escalated = h
        .engine
        .escalate_task(&editor, Identity::new("lead"))
        .await
        .unwrap();
    assert_eq!(escalated.status, TaskStatus::InProgress);
    assert_eq!(escalated.assignee, Some(Identity::new("lead")));
    let first = escalated.escalated_on;

    let commits = h.store.commit_count();
    let again = h
        .engine
        .escalate_task(&editor, Identity::new("lead"))
        .await
        .unwrap();
    assert_eq!(again.escalated_on, first);
    assert_eq!(h.store.commit_count(), commits);

    h.engine
        .escalate_instance(&view.instance.id, Identity::new("boss"))
        .await
        .unwrap();
    let commits = h.store.commit_count();
    let instance = h
        .engine
        .escalate_instance(&view.instance.id, Identity::new("boss"))
        .await
        .unwrap();
    assert_eq!(instance.status, InstanceStatus::InProgress);
    assert_eq!(h.store.commit_count(), commits);
}

#[tokio::test]
async fn test_finished_work_cannot_be_escalated() {
    let h = harness();
    let view = editing(&h).await;

    let err = h
        .engine
        .escalate_task(&task(&view, "1"), Identity::new("lead"))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidTransition { .. }));

    h.engine
        .cancel_instance(&view.instance.id, "withdrawn")
        .await
        .unwrap();
    let err = h
        .engine
        .escalate_instance(&view.instance.id, Identity::new("boss"))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidTransition { .. }));

    let later = Utc::now() + Duration::days(2);
    assert!(h.engine.overdue_tasks(later).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_sweep_escalates_once() {
    let h = harness();
    let view = editing(&h).await;
    let later = Utc::now() + Duration::minutes(90);

    let report = h.engine.run_attention_sweep(later).await.unwrap();
    assert_eq!(report.escalated_tasks.len(), 2);
    assert_eq!(report.escalated_instances, vec![view.instance.id.clone()]);

    let current = h.engine.get_instance(&view.instance.id).await.unwrap();
    assert_eq!(current.task("2").unwrap().assignee, Some(Identity::new("lead")));
    assert_eq!(current.task("3").unwrap().assignee, Some(Identity::new("ops")));
    assert_eq!(current.instance.escalated_to, Some(Identity::new("ops")));

    let commits = h.store.commit_count();
    let again = h.engine.run_attention_sweep(later).await.unwrap();
    assert!(again.escalated_tasks.is_empty());
    assert!(again.escalated_instances.is_empty());
    assert_eq!(h.store.commit_count(), commits);
}

#[tokio::test]
async fn test_concurrent_sweeps_do_not_double_escalate() {
    let h = harness();
    editing(&h).await;
    let later = Utc::now() + Duration::minutes(90);

    let a = {
        let engine = h.engine.clone();
        tokio::spawn(async move { engine.run_attention_sweep(later).await })
    };
    let b = {
        let engine = h.engine.clone();
        tokio::spawn(async move { engine.run_attention_sweep(later).await })
    };
    let a = a.await.unwrap().unwrap();
    let b = b.await.unwrap().unwrap();

    assert_eq!(a.escalated_tasks.len() + b.escalated_tasks.len(), 2);
    assert_eq!(a.escalated_instances.len() + b.escalated_instances.len(), 1);
}

#[tokio::test]
async fn test_sweep_skips_without_target() {
    let h = harness_with_directory(StaticDirectory::new().with_member("author", "alice"));
    editing(&h).await;
    let later = Utc::now() + Duration::minutes(90);

    let report = h.engine.run_attention_sweep(later).await.unwrap();
    assert!(report.escalated_tasks.is_empty());
    assert_eq!(report.skipped, 3);
}

#[tokio::test]
async fn test_revised_task_can_be_escalated_again() {
    let h = harness();
    let view = editing(&h).await;
    let editor = task(&view, "2");
    let legal = task(&view, "3");

    let first = h
        .engine
        .run_attention_sweep(Utc::now() + Duration::minutes(90))
        .await
        .unwrap();
    assert!(first.escalated_tasks.contains(&editor));

    let draft = h.engine.available_files_for_task(&editor).await.unwrap();
    h.engine
        .update_file(&editor, &draft[0].instance_file_id, Identity::new("lead"))
        .await
        .unwrap();
    h.engine.complete_task(&editor, None).await.unwrap();
    h.engine
        .upload_file(&legal, "terms.docx", Identity::new("ops"))
        .await
        .unwrap();
    h.engine.complete_task(&legal, None).await.unwrap();

    let merge = task(&view, "4");
    h.engine.start_task(&merge).await.unwrap();
    h.engine.auto_consolidate(&merge, Identity::new("ed")).await.unwrap();
    let decision = task(&view, "5");
    h.engine.start_task(&decision).await.unwrap();
    h.engine
        .make_decision(&decision, "NEEDS_REVISION", None, Identity::new("ann"))
        .await
        .unwrap();

    let reopened = h.engine.get_instance_task(&editor).await.unwrap();
    assert_eq!(reopened.status, TaskStatus::Pending);
    assert!(!reopened.is_escalated());
    assert_eq!(reopened.assignee, Some(Identity::new("ed")));

    h.engine.start_task(&editor).await.unwrap();
    let second = h
        .engine
        .run_attention_sweep(Utc::now() + Duration::minutes(90))
        .await
        .unwrap();
    assert!(second.escalated_tasks.contains(&editor));
    let escalated = h.engine.get_instance_task(&editor).await.unwrap();
    assert_eq!(escalated.assignee, Some(Identity::new("lead")));
    assert_eq!(escalated.revisit_count, 1);
}
