//! Decision router: outcome interpretation and revision
//!
//! A decision completes its task and then either lets the sequence move
//! on or reopens earlier work. Revision limits are checked for every task
//! a decision would reopen before any task is touched, so a rejected
//! decision leaves the instance exactly as it was.

use crate::snapshot::InstanceSnapshot;
use crate::task_sequencer::{Advance, TaskSequencer};
use chrono::{DateTime, Utc};
use docflow_types::*;
use serde::Serialize;
use std::collections::HashSet;

/// A task an outcome would route to
#[derive(Clone, Debug, Serialize)]
pub struct RoutingTarget {
    pub task_definition_id: TaskDefinitionId,
    pub instance_task_id: InstanceTaskId,
    pub sequence_order: u32,
    pub status: TaskStatus,
    pub revisit_count: u32,
    pub can_be_revised: bool,
}

/// One declared outcome with its resolved targets
#[derive(Clone, Debug, Serialize)]
pub struct RoutingOption {
    pub outcome: String,
    pub revision_strategy: RevisionStrategy,
    pub auto_escalate: bool,
    pub escalation_role: Option<RoleId>,
    pub targets: Vec<RoutingTarget>,
}

/// What routing a decision did
#[derive(Clone, Debug)]
pub struct Routing {
    pub decision: InstanceDecisionOutcome,
    pub reopened: Vec<InstanceTaskId>,
    /// Role the instance should be escalated to
    pub escalation_role: Option<RoleId>,
    pub advance: Advance,
}

/// Interprets decision outcomes
#[derive(Clone, Debug, Default)]
pub struct DecisionRouter {
    sequencer: TaskSequencer,
}

impl DecisionRouter {
    pub fn new(sequencer: TaskSequencer) -> Self {
        Self { sequencer }
    }

    /// Record a decision, complete its task and apply the outcome
    pub fn route(
        &self,
        snapshot: &mut InstanceSnapshot,
        task_id: &InstanceTaskId,
        outcome: &str,
        comments: Option<String>,
        actor: &Identity,
        now: DateTime<Utc>,
    ) -> WorkflowResult<Routing> {
        self.sequencer.ensure_in_progress(snapshot, task_id)?;
        let declared = snapshot
            .definition_of(task_id)?
            .outcome(outcome)
            .cloned()
            .ok_or_else(|| WorkflowError::UnknownOutcome {
                task: task_id.clone(),
                outcome: outcome.to_string(),
            })?;

        let reopen = self.reopen_set(snapshot, task_id, &declared)?;
        for id in &reopen {
            self.ensure_revisable(snapshot, id)?;
        }

        self.sequencer.mark_completed(snapshot, task_id, now)?;
        for id in &reopen {
            snapshot.task_mut(id)?.reopen();
        }

        let mut decision = InstanceDecisionOutcome::new(
            snapshot.instance().id.clone(),
            task_id.clone(),
            declared.name.clone(),
            declared.revision_strategy,
            actor.clone(),
            now,
        )
        .with_comments(comments);
        decision.reopened = reopen.clone();
        snapshot.add_decision(decision.clone());

        let advance = self.sequencer.refresh(snapshot, now);

        tracing::info!(
            instance_id = %snapshot.instance().id,
            task_id = %task_id,
            outcome = %declared.name,
            reopened = reopen.len(),
            "Decision recorded"
        );

        Ok(Routing {
            decision,
            reopened: reopen,
            escalation_role: declared
                .auto_escalate
                .then(|| declared.escalation_role.clone())
                .flatten(),
            advance,
        })
    }

    /// Declared outcomes of a decision task, each with resolved targets
    pub fn routing_options(
        &self,
        snapshot: &InstanceSnapshot,
        task_id: &InstanceTaskId,
    ) -> WorkflowResult<Vec<RoutingOption>> {
        let definition = snapshot.definition_of(task_id)?;
        let mut options = Vec::with_capacity(definition.outcomes.len());

        for outcome in &definition.outcomes {
            let tasks = match outcome.revision_strategy {
                RevisionStrategy::None if outcome.targets.is_empty() => {
                    self.next_stage(snapshot, definition.sequence_order)
                }
                _ => self.resolve_targets(snapshot, outcome)?,
            };
            let targets = tasks
                .into_iter()
                .map(|task| self.describe(snapshot, task))
                .collect::<WorkflowResult<Vec<_>>>()?;
            options.push(RoutingOption {
                outcome: outcome.name.clone(),
                revision_strategy: outcome.revision_strategy,
                auto_escalate: outcome.auto_escalate,
                escalation_role: outcome.escalation_role.clone(),
                targets,
            });
        }

        Ok(options)
    }

    /// Whether the task may be reopened once more
    pub fn can_be_revised(
        &self,
        snapshot: &InstanceSnapshot,
        task_id: &InstanceTaskId,
    ) -> WorkflowResult<bool> {
        let task = snapshot.task(task_id)?;
        Ok(snapshot.definition_of(task_id)?.can_revisit(task.revisit_count))
    }

    fn ensure_revisable(
        &self,
        snapshot: &InstanceSnapshot,
        task_id: &InstanceTaskId,
    ) -> WorkflowResult<()> {
        let task = snapshot.task(task_id)?;
        let definition = snapshot.definition_of(task_id)?;
        if definition.can_revisit(task.revisit_count) {
            Ok(())
        } else {
            Err(WorkflowError::RevisitLimitExceeded {
                task: task_id.clone(),
                revisits: task.revisit_count,
                max: if definition.revisitable {
                    definition.max_revisits
                } else {
                    0
                },
            })
        }
    }

    /// Tasks the outcome reopens, in ascending sequence order. Tasks that
    /// are still PENDING or parked on a configuration issue are left alone;
    /// the deciding task counts as completed.
    fn reopen_set(
        &self,
        snapshot: &InstanceSnapshot,
        task_id: &InstanceTaskId,
        outcome: &DecisionOutcome,
    ) -> WorkflowResult<Vec<InstanceTaskId>> {
        if !outcome.revision_strategy.reopens() {
            return Ok(Vec::new());
        }
        Ok(self
            .resolve_targets(snapshot, outcome)?
            .into_iter()
            .filter(|task| {
                &task.id == task_id
                    || (task.status != TaskStatus::Pending && !task.is_misconfigured())
            })
            .map(|task| task.id.clone())
            .collect())
    }

    fn resolve_targets<'a>(
        &self,
        snapshot: &'a InstanceSnapshot,
        outcome: &DecisionOutcome,
    ) -> WorkflowResult<Vec<&'a InstanceTask>> {
        let mut orders = Vec::with_capacity(outcome.targets.len());
        for target in &outcome.targets {
            let task = snapshot
                .task_for_definition(target)
                .ok_or_else(|| WorkflowError::TaskDefinitionNotFound(target.clone()))?;
            orders.push(task.sequence_order);
        }

        let tasks = snapshot.tasks().iter();
        Ok(match outcome.revision_strategy {
            RevisionStrategy::Cascade => match orders.into_iter().min() {
                Some(lowest) => tasks.filter(|t| t.sequence_order >= lowest).collect(),
                None => Vec::new(),
            },
            RevisionStrategy::Selective | RevisionStrategy::None => {
                let wanted: HashSet<&TaskDefinitionId> = outcome.targets.iter().collect();
                tasks
                    .filter(|t| wanted.contains(&t.task_definition_id))
                    .collect()
            }
        })
    }

    fn next_stage<'a>(&self, snapshot: &'a InstanceSnapshot, after: u32) -> Vec<&'a InstanceTask> {
        let next = snapshot
            .tasks()
            .iter()
            .map(|t| t.sequence_order)
            .filter(|order| *order > after)
            .min();
        snapshot
            .tasks()
            .iter()
            .filter(|t| Some(t.sequence_order) == next)
            .collect()
    }

    fn describe(
        &self,
        snapshot: &InstanceSnapshot,
        task: &InstanceTask,
    ) -> WorkflowResult<RoutingTarget> {
        Ok(RoutingTarget {
            task_definition_id: task.task_definition_id.clone(),
            instance_task_id: task.id.clone(),
            sequence_order: task.sequence_order,
            status: task.status,
            revisit_count: task.revisit_count,
            can_be_revised: self.can_be_revised(snapshot, &task.id)?,
        })
    }
}
