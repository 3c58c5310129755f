//! Error types for docflow operations

use crate::{
    InstanceFileId, InstanceTaskId, ParallelGroupId, TaskDefinitionId, WorkflowDefinitionId,
    WorkflowInstanceId,
};

/// Errors that can occur in workflow operations
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Workflow definition not found: {0}")]
    DefinitionNotFound(WorkflowDefinitionId),

    #[error("Workflow instance not found: {0}")]
    InstanceNotFound(WorkflowInstanceId),

    #[error("Instance task not found: {0}")]
    TaskNotFound(InstanceTaskId),

    #[error("Task definition not found: {0}")]
    TaskDefinitionNotFound(TaskDefinitionId),

    #[error("Instance file not found: {0}")]
    FileNotFound(InstanceFileId),

    #[error("Invalid transition for {entity}: expected {expected}, found {actual}")]
    InvalidTransition {
        entity: String,
        expected: String,
        actual: String,
    },

    #[error("Dependency unmet for task {task}: {reason}")]
    DependencyUnmet {
        task: InstanceTaskId,
        missing: Vec<TaskDefinitionId>,
        reason: String,
    },

    #[error("Selection of {selected} files out of bounds (min {min}, max {})", display_max(.max))]
    SelectionOutOfBounds {
        selected: usize,
        min: u32,
        max: Option<u32>,
    },

    #[error("Unknown decision outcome '{outcome}' for task {task}")]
    UnknownOutcome {
        task: InstanceTaskId,
        outcome: String,
    },

    #[error("Decision task {0} completed without an outcome")]
    MissingOutcome(InstanceTaskId),

    #[error("Revisit limit exceeded for task {task}: {revisits} of {max} revisits used")]
    RevisitLimitExceeded {
        task: InstanceTaskId,
        revisits: u32,
        max: u32,
    },

    #[error("Configuration error: {0}")]
    Configuration(ConfigurationIssue),

    #[error("File action rejected for task {task}: {reason}")]
    FileActionRejected { task: InstanceTaskId, reason: String },

    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),
}

fn display_max(max: &Option<u32>) -> String {
    match max {
        Some(max) => max.to_string(),
        None => "unbounded".to_string(),
    }
}

impl WorkflowError {
    /// Build an [`WorkflowError::InvalidTransition`] from displayable parts
    pub fn invalid_transition(
        entity: impl std::fmt::Display,
        expected: impl Into<String>,
        actual: impl std::fmt::Debug,
    ) -> Self {
        Self::InvalidTransition {
            entity: entity.to_string(),
            expected: expected.into(),
            actual: format!("{:?}", actual),
        }
    }

    /// The taxonomy kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DefinitionNotFound(_)
            | Self::InstanceNotFound(_)
            | Self::TaskNotFound(_)
            | Self::TaskDefinitionNotFound(_)
            | Self::FileNotFound(_) => ErrorKind::NotFound,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::DependencyUnmet { .. } => ErrorKind::DependencyUnmet,
            Self::SelectionOutOfBounds { .. } => ErrorKind::SelectionOutOfBounds,
            Self::UnknownOutcome { .. } => ErrorKind::UnknownOutcome,
            Self::MissingOutcome(_) => ErrorKind::MissingOutcome,
            Self::RevisitLimitExceeded { .. } => ErrorKind::RevisitLimitExceeded,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::FileActionRejected { .. } => ErrorKind::FileActionRejected,
            Self::Collaborator(_) => ErrorKind::Collaborator,
        }
    }
}

impl From<ConfigurationIssue> for WorkflowError {
    fn from(issue: ConfigurationIssue) -> Self {
        Self::Configuration(issue)
    }
}

/// Failure kinds, independent of the concrete variant
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidTransition,
    DependencyUnmet,
    SelectionOutOfBounds,
    UnknownOutcome,
    MissingOutcome,
    RevisitLimitExceeded,
    Configuration,
    FileActionRejected,
    Collaborator,
}

/// A malformed workflow definition
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationIssue {
    #[error("workflow {0} has no tasks")]
    NoTasks(WorkflowDefinitionId),

    #[error("duplicate task id {0}")]
    DuplicateTaskId(TaskDefinitionId),

    #[error("task {task} belongs to workflow {found}, expected {expected}")]
    ForeignTask {
        task: TaskDefinitionId,
        expected: WorkflowDefinitionId,
        found: WorkflowDefinitionId,
    },

    #[error("tasks {first} and {second} share sequence order {order} outside a parallel group")]
    DuplicateSequenceOrder {
        order: u32,
        first: TaskDefinitionId,
        second: TaskDefinitionId,
    },

    #[error("parallel group {group} spans sequence orders {first} and {second}")]
    SplitParallelGroup {
        group: ParallelGroupId,
        first: u32,
        second: u32,
    },

    #[error("task {task} references unknown source task {source_task}")]
    UnknownSourceTask {
        task: TaskDefinitionId,
        source_task: TaskDefinitionId,
    },

    #[error("task {task} reads from {source_task}, which is not strictly upstream")]
    SourceNotUpstream {
        task: TaskDefinitionId,
        source_task: TaskDefinitionId,
    },

    #[error("task {0} lists the same task id twice")]
    DuplicateReference(TaskDefinitionId),

    #[error("decision task {0} declares no outcomes")]
    DecisionWithoutOutcomes(TaskDefinitionId),

    #[error("task {0} declares outcomes but is not a decision task")]
    OutcomesOnNonDecision(TaskDefinitionId),

    #[error("task {task} declares outcome '{outcome}' more than once")]
    DuplicateOutcome {
        task: TaskDefinitionId,
        outcome: String,
    },

    #[error("outcome '{outcome}' of task {task} revises but names no target")]
    OutcomeWithoutTargets {
        task: TaskDefinitionId,
        outcome: String,
    },

    #[error("outcome '{outcome}' of task {task} targets unknown task {target}")]
    UnknownOutcomeTarget {
        task: TaskDefinitionId,
        outcome: String,
        target: TaskDefinitionId,
    },

    #[error("outcome '{outcome}' of task {task} would reopen {target}, which cannot be revisited")]
    UnrevisableTarget {
        task: TaskDefinitionId,
        outcome: String,
        target: TaskDefinitionId,
    },

    #[error("outcome '{outcome}' of task {task} auto-escalates without an escalation role")]
    MissingEscalationRole {
        task: TaskDefinitionId,
        outcome: String,
    },

    #[error("task {task} has minimum selections {min} above maximum {max}")]
    InvalidSelectionBounds {
        task: TaskDefinitionId,
        min: u32,
        max: u32,
    },

    #[error("workflow definition {0} is active and cannot be replaced")]
    DefinitionActive(WorkflowDefinitionId),

    #[error("malformed task id list '{0}'")]
    MalformedTaskIdList(String),
}

/// A failure reported by an external collaborator (store, directory, calendar)
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CollaboratorError {
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("conflicting write: {0}")]
    Conflict(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Result type alias for workflow operations
pub type WorkflowResult<T> = Result<T, WorkflowError>;
