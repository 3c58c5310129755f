//! Collaborator contracts
//!
//! The engine owns no durable state. Everything it reads or writes goes
//! through a [`Store`], and the two lookups it cannot answer itself go
//! through a [`Directory`] and a [`CalendarOracle`].

use async_trait::async_trait;
use chrono::NaiveDate;
use docflow_types::{
    CalendarId, CollaboratorError, Identity, InstanceDecisionOutcome, InstanceFile, InstanceFileId,
    InstanceTask, InstanceTaskId, RoleId, WorkflowDefinition, WorkflowDefinitionId,
    WorkflowInstance, WorkflowInstanceId,
};

/// Result type for collaborator calls
pub type CollaboratorResult<T> = Result<T, CollaboratorError>;

/// Everything one engine operation writes, applied atomically
#[derive(Clone, Debug, Default)]
pub struct ChangeSet {
    pub instance: Option<WorkflowInstance>,
    pub tasks: Vec<InstanceTask>,
    /// New file versions only; existing versions are never rewritten
    pub files: Vec<InstanceFile>,
    /// New decision records only
    pub decisions: Vec<InstanceDecisionOutcome>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.instance.is_none()
            && self.tasks.is_empty()
            && self.files.is_empty()
            && self.decisions.is_empty()
    }
}

/// Persistence for definitions and instance state
#[async_trait]
pub trait Store: Send + Sync {
    // ── Definitions ──────────────────────────────────────────────────

    async fn get_definition(
        &self,
        id: &WorkflowDefinitionId,
    ) -> CollaboratorResult<Option<WorkflowDefinition>>;

    async fn save_definition(&self, definition: WorkflowDefinition) -> CollaboratorResult<()>;

    async fn list_definitions(&self) -> CollaboratorResult<Vec<WorkflowDefinition>>;

    // ── Instances and tasks ──────────────────────────────────────────

    async fn get_instance(
        &self,
        id: &WorkflowInstanceId,
    ) -> CollaboratorResult<Option<WorkflowInstance>>;

    async fn list_instances(&self) -> CollaboratorResult<Vec<WorkflowInstance>>;

    async fn get_instance_task(&self, id: &InstanceTaskId)
        -> CollaboratorResult<Option<InstanceTask>>;

    async fn list_instance_tasks_by_instance(
        &self,
        instance_id: &WorkflowInstanceId,
    ) -> CollaboratorResult<Vec<InstanceTask>>;

    // ── Files ────────────────────────────────────────────────────────

    /// Every version of one instance file, ascending
    async fn list_instance_file_versions(
        &self,
        id: &InstanceFileId,
    ) -> CollaboratorResult<Vec<InstanceFile>>;

    async fn list_instance_files_by_task(
        &self,
        task_id: &InstanceTaskId,
    ) -> CollaboratorResult<Vec<InstanceFile>>;

    async fn list_instance_files_by_instance(
        &self,
        instance_id: &WorkflowInstanceId,
    ) -> CollaboratorResult<Vec<InstanceFile>>;

    // ── Decisions ────────────────────────────────────────────────────

    /// Decision records of an instance, in creation order
    async fn list_decisions_by_instance(
        &self,
        instance_id: &WorkflowInstanceId,
    ) -> CollaboratorResult<Vec<InstanceDecisionOutcome>>;

    /// Apply a change set. Either every record is written or none is.
    async fn commit(&self, changes: ChangeSet) -> CollaboratorResult<()>;
}

/// User and role lookups
#[async_trait]
pub trait Directory: Send + Sync {
    /// Who performs tasks for a role, if anyone
    async fn resolve_assignee(&self, role: &RoleId) -> CollaboratorResult<Option<Identity>>;

    /// Who a stalled item owned by `identity` goes to
    async fn resolve_escalation_target(
        &self,
        identity: &Identity,
    ) -> CollaboratorResult<Option<Identity>>;
}

/// Run-date validity, consulted only when starting scheduled instances
#[async_trait]
pub trait CalendarOracle: Send + Sync {
    async fn is_valid_run_date(
        &self,
        calendar: &CalendarId,
        date: NaiveDate,
    ) -> CollaboratorResult<bool>;

    /// The first valid run date strictly after `from`
    async fn next_valid_date(
        &self,
        calendar: &CalendarId,
        from: NaiveDate,
    ) -> CollaboratorResult<Option<NaiveDate>>;
}
