//! Concurrent mutation, atomic commits and sequencing properties

mod common;

use common::*;
use docflow_types::*;
use proptest::prelude::*;

/// One upload task, then a group of `width` uploads, then a final upload
fn fan_out_definition(width: u32) -> WorkflowDefinition {
    let role = RoleId::new("author");
    let mut wf = WorkflowDefinition::with_id(WorkflowDefinitionId::new("fan"), "Fan out");
    wf.add_task(TaskDefinition::upload("open", 1, role.clone()))
        .unwrap();
    for i in 0..width {
        wf.add_task(TaskDefinition::upload(format!("p{}", i), 2, role.clone()).in_group("fan"))
            .unwrap();
    }
    wf.add_task(TaskDefinition::upload("close", 3, role)).unwrap();
    wf.active = true;
    wf
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_group_completes_exactly_once_under_contention() {
    let h = harness();
    let id = h.engine.register_definition(fan_out_definition(8)).await.unwrap();
    let view = h.engine.start_instance(&id, Identity::new("alice")).await.unwrap();
    finish(&h.engine, &task(&view, "open")).await;

    let members: Vec<InstanceTaskId> = (0..8).map(|i| task(&view, &format!("p{}", i))).collect();
    for member in &members {
        h.engine.start_task(member).await.unwrap();
    }

    let handles: Vec<_> = members
        .into_iter()
        .map(|member| {
            let engine = h.engine.clone();
            tokio::spawn(async move { engine.complete_task(&member, None).await })
        })
        .collect();

    let mut activations = 0;
    for handle in handles {
        let transition = handle.await.unwrap().unwrap();
        activations += transition.activated.len();
    }
    assert_eq!(activations, 1);

    let current = h.engine.get_instance(&view.instance.id).await.unwrap();
    let eligible: Vec<&str> = current
        .eligible()
        .iter()
        .map(|t| t.task_definition_id.as_str())
        .collect();
    assert_eq!(eligible, vec!["close"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_double_completion_has_one_winner() {
    let h = harness();
    let id = h.engine.register_definition(chain_definition(2)).await.unwrap();
    let view = h.engine.start_instance(&id, Identity::new("alice")).await.unwrap();
    let first = task(&view, "t1");
    h.engine.start_task(&first).await.unwrap();

    let a = {
        let (engine, first) = (h.engine.clone(), first.clone());
        tokio::spawn(async move { engine.complete_task(&first, None).await })
    };
    let b = {
        let (engine, first) = (h.engine.clone(), first.clone());
        tokio::spawn(async move { engine.complete_task(&first, None).await })
    };
    let results = [a.await.unwrap(), b.await.unwrap()];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results.iter().any(|r| matches!(
        r,
        Err(WorkflowError::InvalidTransition { .. })
    )));
}

#[tokio::test]
async fn test_failed_commit_leaves_no_partial_state() {
    let h = harness();
    let view = start_review(&h).await;
    let upload = task(&view, "1");
    h.engine.start_task(&upload).await.unwrap();
    h.engine
        .upload_file(&upload, "draft.docx", Identity::new("alice"))
        .await
        .unwrap();

    h.store.set_unavailable(true);
    let err = h.engine.complete_task(&upload, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Collaborator);
    h.store.set_unavailable(false);

    let current = h.engine.get_instance(&view.instance.id).await.unwrap();
    assert_eq!(current.task("1").unwrap().status, TaskStatus::InProgress);
    assert!(current.eligible().is_empty());

    // The operation can simply be retried
    let done = h.engine.complete_task(&upload, None).await.unwrap();
    assert_eq!(done.activated.len(), 2);
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Exactly one task is eligible at any point of a linear chain, and
    /// the instance completes with its last task
    #[test]
    fn prop_linear_chain_advances_one_by_one(length in 1u32..8) {
        runtime().block_on(async {
            let h = harness();
            let id = h.engine.register_definition(chain_definition(length)).await.unwrap();
            let view = h.engine.start_instance(&id, Identity::new("alice")).await.unwrap();

            for order in 1..=length {
                let current = h.engine.get_instance(&view.instance.id).await.unwrap();
                let eligible = current.eligible();
                prop_assert_eq!(eligible.len(), 1);
                prop_assert_eq!(eligible[0].sequence_order, order);

                let done = finish(&h.engine, &eligible[0].id.clone()).await;
                prop_assert_eq!(done.instance_completed, order == length);
            }
            prop_assert!(h.engine.is_complete(&view.instance.id).await.unwrap());
            Ok(())
        })?;
    }

    /// The stage after a group opens only once every member is done,
    /// whatever the completion order
    #[test]
    fn prop_group_gates_in_any_order(order in Just((0..6u32).collect::<Vec<_>>()).prop_shuffle()) {
        runtime().block_on(async {
            let width = order.len() as u32;
            let h = harness();
            let id = h.engine.register_definition(fan_out_definition(width)).await.unwrap();
            let view = h.engine.start_instance(&id, Identity::new("alice")).await.unwrap();
            finish(&h.engine, &task(&view, "open")).await;

            let close = task(&view, "close");
            for (done, i) in order.iter().enumerate() {
                prop_assert!(!h.engine.get_instance_task(&close).await.unwrap().eligible);
                let transition = finish(&h.engine, &task(&view, &format!("p{}", i))).await;
                let last = done + 1 == order.len();
                prop_assert_eq!(transition.activated.len(), usize::from(last));
            }
            prop_assert!(h.engine.get_instance_task(&close).await.unwrap().eligible);
            Ok(())
        })?;
    }
}
