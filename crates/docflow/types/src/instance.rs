//! Workflow instances and their materialized tasks

use crate::{
    Identity, InstanceTaskId, TaskDefinition, TaskDefinitionId, TaskKind, WorkflowDefinitionId,
    WorkflowInstanceId,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ── Workflow Instance ────────────────────────────────────────────────

/// One run of a workflow definition
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowInstance {
    /// Unique instance identifier
    pub id: WorkflowInstanceId,
    /// Which definition this is an instance of
    pub definition_id: WorkflowDefinitionId,
    /// Definition version at the time of instantiation
    pub definition_version: u32,
    /// Current status
    pub status: InstanceStatus,
    /// Who triggered the run
    pub started_by: Identity,
    /// When the instance was created
    pub created_at: DateTime<Utc>,
    /// When the first task started
    pub started_on: Option<DateTime<Utc>>,
    /// When the last task completed
    pub completed_on: Option<DateTime<Utc>>,
    /// Identity the instance was escalated to
    pub escalated_to: Option<Identity>,
    /// When the instance was escalated
    pub escalated_on: Option<DateTime<Utc>>,
    /// Why the instance was cancelled
    pub cancellation_reason: Option<String>,
    /// Run date for calendar-triggered instances
    pub scheduled_for: Option<NaiveDate>,
    /// Metadata
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl WorkflowInstance {
    pub fn new(
        definition_id: WorkflowDefinitionId,
        definition_version: u32,
        started_by: Identity,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: WorkflowInstanceId::generate(),
            definition_id,
            definition_version,
            status: InstanceStatus::Pending,
            started_by,
            created_at: now,
            started_on: None,
            completed_on: None,
            escalated_to: None,
            escalated_on: None,
            cancellation_reason: None,
            scheduled_for: None,
            metadata: HashMap::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_escalated(&self) -> bool {
        self.escalated_to.is_some()
    }

    /// Minutes since the instance started, if it has
    pub fn elapsed_minutes(&self, now: DateTime<Utc>) -> Option<i64> {
        self.started_on.map(|started| (now - started).num_minutes())
    }
}

/// Lifecycle of a workflow instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    /// Created, no task started yet
    Pending,
    /// At least one task has started
    InProgress,
    /// Every task completed
    Completed,
    /// Explicitly cancelled
    Cancelled,
    /// Blocked on a configuration problem found at instance time
    Escalated,
}

impl InstanceStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
            Self::Escalated => "ESCALATED",
        };
        f.write_str(label)
    }
}

// ── Instance Task ────────────────────────────────────────────────────

/// The per-run materialization of one task definition
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InstanceTask {
    pub id: InstanceTaskId,
    pub instance_id: WorkflowInstanceId,
    pub task_definition_id: TaskDefinitionId,
    /// Copied from the definition so stage queries need no lookup
    pub sequence_order: u32,
    pub kind: TaskKind,
    pub status: TaskStatus,
    /// Whether the task belongs to the current stage and may be started
    pub eligible: bool,
    pub assignee: Option<Identity>,
    pub started_on: Option<DateTime<Utc>>,
    pub completed_on: Option<DateTime<Utc>>,
    /// How many times the task has been reopened by a decision
    pub revisit_count: u32,
    pub escalated_to: Option<Identity>,
    pub escalated_on: Option<DateTime<Utc>>,
    /// Assignee before the first escalation of the current pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalated_from: Option<Identity>,
    pub rejection_reason: Option<String>,
    /// Set when the definition was found broken at instance time
    pub configuration_issue: Option<String>,
}

impl InstanceTask {
    /// Materialize a task definition for an instance, pending and ineligible
    pub fn materialize(
        instance_id: &WorkflowInstanceId,
        definition: &TaskDefinition,
        assignee: Option<Identity>,
    ) -> Self {
        Self {
            id: InstanceTaskId::generate(),
            instance_id: instance_id.clone(),
            task_definition_id: definition.id.clone(),
            sequence_order: definition.sequence_order,
            kind: definition.kind,
            status: TaskStatus::Pending,
            eligible: false,
            assignee,
            started_on: None,
            completed_on: None,
            revisit_count: 0,
            escalated_to: None,
            escalated_on: None,
            escalated_from: None,
            rejection_reason: None,
            configuration_issue: None,
        }
    }

    /// Whether the task is still pending or in progress
    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    pub fn is_escalated(&self) -> bool {
        self.escalated_to.is_some()
    }

    pub fn is_misconfigured(&self) -> bool {
        self.configuration_issue.is_some()
    }

    /// Minutes since the task started, if it has
    pub fn elapsed_minutes(&self, now: DateTime<Utc>) -> Option<i64> {
        self.started_on.map(|started| (now - started).num_minutes())
    }

    /// Reassign to `target`, returning the previous assignee. The assignee
    /// from before the first escalation is kept for [`Self::reopen`].
    pub fn escalate(&mut self, target: Identity, now: DateTime<Utc>) -> Option<Identity> {
        let previous = self.assignee.replace(target.clone());
        if self.escalated_to.is_none() {
            self.escalated_from = previous.clone();
        }
        self.escalated_to = Some(target);
        self.escalated_on = Some(now);
        previous
    }

    /// Send the task back to PENDING for another pass. An escalation from
    /// the previous pass is undone so the new pass can escalate again.
    pub fn reopen(&mut self) {
        self.status = TaskStatus::Pending;
        self.eligible = false;
        self.started_on = None;
        self.completed_on = None;
        self.rejection_reason = None;
        self.revisit_count += 1;
        if self.escalated_to.take().is_some() {
            self.assignee = self.escalated_from.take();
            self.escalated_on = None;
        }
    }
}

/// Lifecycle of an instance task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Rejected,
    /// Parked because its definition is broken
    Escalated,
}

impl TaskStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::InProgress)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Rejected => "REJECTED",
            Self::Escalated => "ESCALATED",
        };
        f.write_str(label)
    }
}
