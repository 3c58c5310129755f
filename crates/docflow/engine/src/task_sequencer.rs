//! Task sequencer: instance-task lifecycle and stage advancement
//!
//! The current stage of an instance is the lowest sequence order that
//! still has a task not COMPLETED. Its PENDING tasks are eligible to start
//! and nothing else is. Eligibility is recomputed after every mutation, so
//! parallel groups gate naturally: the stage does not move until every
//! member is complete, no matter in which order they finish.

use crate::dependency_resolver::DependencyResolver;
use crate::snapshot::InstanceSnapshot;
use chrono::{DateTime, Utc};
use docflow_types::*;
use std::collections::HashMap;

/// Result of re-deriving the current stage
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Advance {
    /// Tasks that became eligible
    pub activated: Vec<InstanceTaskId>,
    /// Whether this mutation completed the instance
    pub instance_completed: bool,
}

/// Drives instance tasks through their lifecycle
#[derive(Clone, Debug, Default)]
pub struct TaskSequencer {
    dependencies: DependencyResolver,
}

impl TaskSequencer {
    pub fn new(dependencies: DependencyResolver) -> Self {
        Self { dependencies }
    }

    // ── Instance creation ────────────────────────────────────────────

    /// Materialize one pending task per definition. Tasks whose own
    /// definition is broken are parked as ESCALATED with `escalate_to`.
    pub fn materialize(
        &self,
        definition: &WorkflowDefinition,
        instance: &WorkflowInstance,
        assignees: &HashMap<TaskDefinitionId, Identity>,
        escalate_to: Option<&Identity>,
        now: DateTime<Utc>,
    ) -> Vec<InstanceTask> {
        definition
            .tasks_in_order()
            .into_iter()
            .map(|task_def| {
                let mut task = InstanceTask::materialize(
                    &instance.id,
                    task_def,
                    assignees.get(&task_def.id).cloned(),
                );
                let issues = definition.task_issues(task_def);
                if let Some(issue) = issues.first() {
                    tracing::warn!(
                        instance_id = %instance.id,
                        task = %task_def.id,
                        issue = %issue,
                        "Task definition is misconfigured, parking task"
                    );
                    task.status = TaskStatus::Escalated;
                    task.configuration_issue = Some(issue.to_string());
                    if let Some(target) = escalate_to {
                        task.escalate(target.clone(), now);
                    }
                }
                task
            })
            .collect()
    }

    // ── Stage derivation ─────────────────────────────────────────────

    /// The lowest sequence order with a task that is not COMPLETED
    pub fn current_stage(&self, tasks: &[InstanceTask]) -> Option<u32> {
        tasks
            .iter()
            .filter(|t| t.status != TaskStatus::Completed)
            .map(|t| t.sequence_order)
            .min()
    }

    /// Recompute eligibility and instance completion
    pub fn refresh(&self, snapshot: &mut InstanceSnapshot, now: DateTime<Utc>) -> Advance {
        let stage = self.current_stage(snapshot.tasks());
        let accepting = !snapshot.instance().is_terminal();
        let mut activated = Vec::new();

        snapshot.update_tasks(|task| {
            let eligible = accepting
                && Some(task.sequence_order) == stage
                && task.status == TaskStatus::Pending
                && !task.is_misconfigured();
            if eligible == task.eligible {
                return false;
            }
            if eligible {
                activated.push(task.id.clone());
            }
            task.eligible = eligible;
            true
        });

        let mut instance_completed = false;
        if stage.is_none() && !snapshot.instance().is_terminal() {
            let instance = snapshot.instance_mut();
            instance.status = InstanceStatus::Completed;
            instance.completed_on = Some(now);
            instance_completed = true;
            tracing::info!(instance_id = %instance.id, "Workflow instance completed");
        }

        for id in &activated {
            tracing::debug!(instance_id = %snapshot.instance().id, task_id = %id, "Task eligible");
        }

        Advance {
            activated,
            instance_completed,
        }
    }

    // ── Transitions ──────────────────────────────────────────────────

    /// PENDING → IN_PROGRESS for an eligible task whose sources have files
    pub fn start(
        &self,
        snapshot: &mut InstanceSnapshot,
        task_id: &InstanceTaskId,
        now: DateTime<Utc>,
    ) -> WorkflowResult<()> {
        snapshot.ensure_mutable()?;
        let task = snapshot.task(task_id)?;
        if task.status != TaskStatus::Pending {
            return Err(WorkflowError::invalid_transition(task_id, "PENDING", task.status));
        }
        if !task.eligible {
            return Err(WorkflowError::InvalidTransition {
                entity: task_id.to_string(),
                expected: "a task in the current stage".into(),
                actual: format!("stage {} not reached", task.sequence_order),
            });
        }
        if !snapshot.definition_of(task_id)?.source_task_ids.is_empty() {
            self.dependencies.validate(snapshot, task_id)?;
        }

        let task = snapshot.task_mut(task_id)?;
        task.status = TaskStatus::InProgress;
        task.eligible = false;
        task.started_on = Some(now);

        if snapshot.instance().status == InstanceStatus::Pending {
            let instance = snapshot.instance_mut();
            instance.status = InstanceStatus::InProgress;
            instance.started_on = Some(now);
        }

        tracing::info!(
            instance_id = %snapshot.instance().id,
            task_id = %task_id,
            "Task started"
        );
        Ok(())
    }

    /// Fail unless the task is IN_PROGRESS in a mutable instance
    pub fn ensure_in_progress(
        &self,
        snapshot: &InstanceSnapshot,
        task_id: &InstanceTaskId,
    ) -> WorkflowResult<()> {
        snapshot.ensure_mutable()?;
        let task = snapshot.task(task_id)?;
        if task.status != TaskStatus::InProgress {
            return Err(WorkflowError::invalid_transition(
                task_id,
                "IN_PROGRESS",
                task.status,
            ));
        }
        Ok(())
    }

    /// IN_PROGRESS → COMPLETED without advancing; see [`complete`](Self::complete)
    pub fn mark_completed(
        &self,
        snapshot: &mut InstanceSnapshot,
        task_id: &InstanceTaskId,
        now: DateTime<Utc>,
    ) -> WorkflowResult<()> {
        self.ensure_in_progress(snapshot, task_id)?;
        let task = snapshot.task_mut(task_id)?;
        task.status = TaskStatus::Completed;
        task.completed_on = Some(now);
        tracing::info!(
            instance_id = %task.instance_id,
            task_id = %task_id,
            "Task completed"
        );
        Ok(())
    }

    /// IN_PROGRESS → COMPLETED, then advance the sequence
    pub fn complete(
        &self,
        snapshot: &mut InstanceSnapshot,
        task_id: &InstanceTaskId,
        now: DateTime<Utc>,
    ) -> WorkflowResult<Advance> {
        self.mark_completed(snapshot, task_id, now)?;
        Ok(self.refresh(snapshot, now))
    }

    /// IN_PROGRESS → REJECTED. The instance stays open.
    pub fn fail(
        &self,
        snapshot: &mut InstanceSnapshot,
        task_id: &InstanceTaskId,
        reason: impl Into<String>,
    ) -> WorkflowResult<()> {
        self.ensure_in_progress(snapshot, task_id)?;
        let reason = reason.into();
        let task = snapshot.task_mut(task_id)?;
        task.status = TaskStatus::Rejected;
        task.rejection_reason = Some(reason.clone());
        tracing::info!(
            instance_id = %task.instance_id,
            task_id = %task_id,
            reason = %reason,
            "Task rejected"
        );
        Ok(())
    }

    /// Non-terminal → CANCELLED. Nothing stays eligible.
    pub fn cancel(
        &self,
        snapshot: &mut InstanceSnapshot,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> WorkflowResult<()> {
        snapshot.ensure_mutable()?;
        let reason = reason.into();
        let instance = snapshot.instance_mut();
        instance.status = InstanceStatus::Cancelled;
        instance.completed_on = Some(now);
        instance.cancellation_reason = Some(reason.clone());
        tracing::info!(instance_id = %instance.id, reason = %reason, "Workflow instance cancelled");
        self.refresh(snapshot, now);
        Ok(())
    }

    /// True iff no task is PENDING or IN_PROGRESS
    pub fn is_complete(&self, tasks: &[InstanceTask]) -> bool {
        !tasks.iter().any(InstanceTask::is_open)
    }
}
