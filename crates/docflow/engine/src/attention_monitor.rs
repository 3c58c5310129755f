//! Attention monitor: overdue detection, reminders and escalation
//!
//! Detection is read-only and works on whatever snapshot it is handed.
//! Escalation is the one mutation the monitor performs itself: it moves
//! an item to a new assignee and marks it escalated, and never changes a
//! lifecycle status.

use crate::snapshot::InstanceSnapshot;
use chrono::{DateTime, Duration, Utc};
use docflow_types::*;
use serde::Serialize;

/// What kind of attention an item needs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttentionKind {
    /// Active longer than the escalation threshold
    Overdue,
    /// Inside the reminder window before its due time
    Reminder,
}

/// The item needing attention
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AttentionSubject {
    Task {
        task_id: InstanceTaskId,
        task_definition_id: TaskDefinitionId,
    },
    Instance,
}

/// One item needing attention
#[derive(Clone, Debug, Serialize)]
pub struct AttentionItem {
    pub kind: AttentionKind,
    pub instance_id: WorkflowInstanceId,
    pub subject: AttentionSubject,
    pub assignee: Option<Identity>,
    pub started_on: DateTime<Utc>,
    pub elapsed_minutes: i64,
    /// The threshold that was crossed, in minutes
    pub threshold_minutes: u32,
    pub due_at: Option<DateTime<Utc>>,
    pub already_escalated: bool,
}

impl AttentionItem {
    pub fn task_id(&self) -> Option<&InstanceTaskId> {
        match &self.subject {
            AttentionSubject::Task { task_id, .. } => Some(task_id),
            AttentionSubject::Instance => None,
        }
    }
}

/// Detects items needing attention and applies escalations
#[derive(Clone, Debug, Default)]
pub struct AttentionMonitor;

impl AttentionMonitor {
    pub fn new() -> Self {
        Self
    }

    // ── Detection ────────────────────────────────────────────────────

    /// IN_PROGRESS tasks active longer than their escalation threshold
    pub fn overdue_tasks(&self, snapshot: &InstanceSnapshot, now: DateTime<Utc>) -> Vec<AttentionItem> {
        if snapshot.instance().is_terminal() {
            return Vec::new();
        }
        snapshot
            .tasks()
            .iter()
            .filter(|task| task.status == TaskStatus::InProgress)
            .filter_map(|task| {
                let timing = self.task_timing(snapshot, task)?;
                let threshold = timing.escalation_after_minutes?;
                let started = task.started_on?;
                exceeded(started, threshold, now).then(|| AttentionItem {
                    kind: AttentionKind::Overdue,
                    instance_id: task.instance_id.clone(),
                    subject: task_subject(task),
                    assignee: task.assignee.clone(),
                    started_on: started,
                    elapsed_minutes: (now - started).num_minutes(),
                    threshold_minutes: threshold,
                    due_at: due_at(started, &timing),
                    already_escalated: task.is_escalated(),
                })
            })
            .collect()
    }

    /// The instance, if it is IN_PROGRESS past the workflow threshold
    pub fn overdue_instance(
        &self,
        snapshot: &InstanceSnapshot,
        now: DateTime<Utc>,
    ) -> Option<AttentionItem> {
        let instance = snapshot.instance();
        if instance.status != InstanceStatus::InProgress {
            return None;
        }
        let timing = &snapshot.definition.timing;
        let threshold = timing.escalation_after_minutes?;
        let started = instance.started_on?;
        exceeded(started, threshold, now).then(|| AttentionItem {
            kind: AttentionKind::Overdue,
            instance_id: instance.id.clone(),
            subject: AttentionSubject::Instance,
            assignee: instance.escalated_to.clone(),
            started_on: started,
            elapsed_minutes: (now - started).num_minutes(),
            threshold_minutes: threshold,
            due_at: due_at(started, timing),
            already_escalated: instance.is_escalated(),
        })
    }

    /// IN_PROGRESS items inside the reminder window but not yet due
    pub fn needing_reminder(
        &self,
        snapshot: &InstanceSnapshot,
        now: DateTime<Utc>,
    ) -> Vec<AttentionItem> {
        let instance = snapshot.instance();
        if instance.is_terminal() {
            return Vec::new();
        }

        let mut items: Vec<AttentionItem> = snapshot
            .tasks()
            .iter()
            .filter(|task| task.status == TaskStatus::InProgress)
            .filter_map(|task| {
                let timing = self.task_timing(snapshot, task)?;
                let started = task.started_on?;
                let (due, lead) = in_reminder_window(started, &timing, now)?;
                Some(AttentionItem {
                    kind: AttentionKind::Reminder,
                    instance_id: task.instance_id.clone(),
                    subject: task_subject(task),
                    assignee: task.assignee.clone(),
                    started_on: started,
                    elapsed_minutes: (now - started).num_minutes(),
                    threshold_minutes: lead,
                    due_at: Some(due),
                    already_escalated: task.is_escalated(),
                })
            })
            .collect();

        if instance.status == InstanceStatus::InProgress {
            let timing = &snapshot.definition.timing;
            if let Some(started) = instance.started_on {
                if let Some((due, lead)) = in_reminder_window(started, timing, now) {
                    items.push(AttentionItem {
                        kind: AttentionKind::Reminder,
                        instance_id: instance.id.clone(),
                        subject: AttentionSubject::Instance,
                        assignee: instance.escalated_to.clone(),
                        started_on: started,
                        elapsed_minutes: (now - started).num_minutes(),
                        threshold_minutes: lead,
                        due_at: Some(due),
                        already_escalated: instance.is_escalated(),
                    });
                }
            }
        }

        items
    }

    fn task_timing(&self, snapshot: &InstanceSnapshot, task: &InstanceTask) -> Option<TimingPolicy> {
        snapshot
            .definition
            .task(&task.task_definition_id)
            .map(|def| snapshot.definition.timing_for(def))
    }

    // ── Escalation ───────────────────────────────────────────────────

    /// Reassign a PENDING or IN_PROGRESS task. Returns false when the task
    /// is already escalated to `target`.
    pub fn escalate_task(
        &self,
        snapshot: &mut InstanceSnapshot,
        task_id: &InstanceTaskId,
        target: &Identity,
        now: DateTime<Utc>,
    ) -> WorkflowResult<bool> {
        snapshot.ensure_mutable()?;
        let task = snapshot.task(task_id)?;
        if !task.is_open() {
            return Err(WorkflowError::invalid_transition(
                task_id,
                "PENDING or IN_PROGRESS",
                task.status,
            ));
        }
        if task.escalated_to.as_ref() == Some(target) && task.assignee.as_ref() == Some(target) {
            tracing::debug!(task_id = %task_id, target = %target, "Task already escalated");
            return Ok(false);
        }

        let task = snapshot.task_mut(task_id)?;
        let previous = task.escalate(target.clone(), now);

        tracing::info!(
            instance_id = %task.instance_id,
            task_id = %task_id,
            from = ?previous,
            to = %target,
            "Task escalated"
        );
        Ok(true)
    }

    /// Mark a non-terminal instance escalated to `target`. Returns false
    /// when it already is.
    pub fn escalate_instance(
        &self,
        snapshot: &mut InstanceSnapshot,
        target: &Identity,
        now: DateTime<Utc>,
    ) -> WorkflowResult<bool> {
        snapshot.ensure_mutable()?;
        if snapshot.instance().escalated_to.as_ref() == Some(target) {
            tracing::debug!(
                instance_id = %snapshot.instance().id,
                target = %target,
                "Instance already escalated"
            );
            return Ok(false);
        }

        let instance = snapshot.instance_mut();
        instance.escalated_to = Some(target.clone());
        instance.escalated_on = Some(now);
        tracing::info!(instance_id = %instance.id, to = %target, "Workflow instance escalated");
        Ok(true)
    }
}

fn task_subject(task: &InstanceTask) -> AttentionSubject {
    AttentionSubject::Task {
        task_id: task.id.clone(),
        task_definition_id: task.task_definition_id.clone(),
    }
}

fn exceeded(started: DateTime<Utc>, threshold_minutes: u32, now: DateTime<Utc>) -> bool {
    now - started > Duration::minutes(i64::from(threshold_minutes))
}

fn due_at(started: DateTime<Utc>, timing: &TimingPolicy) -> Option<DateTime<Utc>> {
    timing
        .due_minutes
        .map(|minutes| started + Duration::minutes(i64::from(minutes)))
}

/// Due time and reminder lead when `now` is in `[due - lead, due)`
fn in_reminder_window(
    started: DateTime<Utc>,
    timing: &TimingPolicy,
    now: DateTime<Utc>,
) -> Option<(DateTime<Utc>, u32)> {
    let due = due_at(started, timing)?;
    let lead = timing.reminder_before_due_minutes?;
    let opens = due - Duration::minutes(i64::from(lead));
    (now >= opens && now < due).then_some((due, lead))
}
