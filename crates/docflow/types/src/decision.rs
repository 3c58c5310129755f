//! Recorded decisions
//!
//! Decision records are append-only. Revision history is reconstructed
//! from them plus the revisit counters on the tasks.

use crate::{DecisionId, Identity, InstanceTaskId, RevisionStrategy, WorkflowInstanceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One decision made on a decision task
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDecisionOutcome {
    pub id: DecisionId,
    pub instance_id: WorkflowInstanceId,
    pub task_id: InstanceTaskId,
    /// Matches one of the task definition's declared outcomes
    pub outcome: String,
    pub revision_strategy: RevisionStrategy,
    pub created_by: Identity,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    /// Tasks reopened by this decision, in reopening order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reopened: Vec<InstanceTaskId>,
}

impl InstanceDecisionOutcome {
    pub fn new(
        instance_id: WorkflowInstanceId,
        task_id: InstanceTaskId,
        outcome: impl Into<String>,
        revision_strategy: RevisionStrategy,
        created_by: Identity,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: DecisionId::generate(),
            instance_id,
            task_id,
            outcome: outcome.into(),
            revision_strategy,
            created_by,
            created_at,
            comments: None,
            reopened: Vec::new(),
        }
    }

    pub fn with_comments(mut self, comments: Option<String>) -> Self {
        self.comments = comments;
        self
    }

    pub fn triggered_revision(&self) -> bool {
        !self.reopened.is_empty()
    }
}
