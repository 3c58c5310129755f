//! Workflow definitions: the template an instance is materialized from
//!
//! A WorkflowDefinition is an ordered list of task definitions. Sequence
//! order drives execution; tasks that share an order must belong to the
//! same parallel group and run as one stage.
//!
//! Definitions are validated once, when they are registered. Every rule
//! that can be checked without an instance is checked here, so the engine
//! only has to deal with runtime state.

use crate::{
    task_id_list, ConfigurationIssue, ParallelGroupId, RoleId, TaskDefinitionId, WorkflowDefinitionId,
    WorkflowError, WorkflowResult,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

// ── Workflow Definition ──────────────────────────────────────────────

/// A workflow definition: the reusable template of ordered tasks
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Unique identifier
    pub id: WorkflowDefinitionId,
    /// Human-readable name
    pub name: String,
    /// What this workflow is for
    #[serde(default)]
    pub description: String,
    /// Version for tracking definition evolution
    #[serde(default = "default_version")]
    pub version: u32,
    /// Active definitions can be started and can no longer be replaced
    #[serde(default)]
    pub active: bool,
    /// The task definitions, in any order
    pub tasks: Vec<TaskDefinition>,
    /// Reminder and escalation thresholds for the workflow
    #[serde(default)]
    pub timing: TimingPolicy,
    /// When this definition was created
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Metadata
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

fn default_version() -> u32 {
    1
}

impl WorkflowDefinition {
    /// Create a new, inactive workflow definition with a generated id
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(WorkflowDefinitionId::generate(), name)
    }

    /// Create a new, inactive workflow definition with a fixed id
    pub fn with_id(id: WorkflowDefinitionId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            description: String::new(),
            version: 1,
            active: false,
            tasks: Vec::new(),
            timing: TimingPolicy::default(),
            created_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Parse a definition document. Tasks without a workflow id adopt
    /// this definition's id.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let mut definition: WorkflowDefinition = serde_json::from_str(json)?;
        for task in &mut definition.tasks {
            if task.workflow_id.as_str().is_empty() {
                task.workflow_id = definition.id.clone();
            }
        }
        Ok(definition)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_timing(mut self, timing: TimingPolicy) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Add a task definition. The task is adopted into this workflow.
    pub fn add_task(&mut self, mut task: TaskDefinition) -> WorkflowResult<()> {
        if self.tasks.iter().any(|t| t.id == task.id) {
            return Err(ConfigurationIssue::DuplicateTaskId(task.id).into());
        }
        task.workflow_id = self.id.clone();
        self.tasks.push(task);
        Ok(())
    }

    /// Get a task definition by id
    pub fn task(&self, id: &TaskDefinitionId) -> Option<&TaskDefinition> {
        self.tasks.iter().find(|t| &t.id == id)
    }

    /// Task definitions in ascending sequence order (ties broken by id)
    pub fn tasks_in_order(&self) -> Vec<&TaskDefinition> {
        let mut tasks: Vec<&TaskDefinition> = self.tasks.iter().collect();
        tasks.sort_by(|a, b| {
            a.sequence_order
                .cmp(&b.sequence_order)
                .then_with(|| a.id.cmp(&b.id))
        });
        tasks
    }

    /// Distinct sequence orders, ascending
    pub fn stage_orders(&self) -> BTreeSet<u32> {
        self.tasks.iter().map(|t| t.sequence_order).collect()
    }

    /// Timing policy for a task: each threshold the task sets, the
    /// workflow default for the rest
    pub fn timing_for(&self, task: &TaskDefinition) -> TimingPolicy {
        match &task.timing {
            Some(own) => own.or(&self.timing),
            None => self.timing.clone(),
        }
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Validate the whole definition. Returns the first issue found.
    pub fn validate(&self) -> WorkflowResult<()> {
        if let Some(issue) = self.structural_issues().into_iter().next() {
            return Err(WorkflowError::Configuration(issue));
        }
        for task in self.tasks_in_order() {
            if let Some(issue) = self.task_issues(task).into_iter().next() {
                return Err(WorkflowError::Configuration(issue));
            }
        }
        Ok(())
    }

    /// Issues that make the definition as a whole unusable: no tasks,
    /// duplicate ids, ordering ties outside a parallel group.
    pub fn structural_issues(&self) -> Vec<ConfigurationIssue> {
        let mut issues = Vec::new();

        if self.tasks.is_empty() {
            issues.push(ConfigurationIssue::NoTasks(self.id.clone()));
            return issues;
        }

        let mut seen = HashSet::new();
        for task in &self.tasks {
            if !seen.insert(&task.id) {
                issues.push(ConfigurationIssue::DuplicateTaskId(task.id.clone()));
            }
            if task.workflow_id != self.id {
                issues.push(ConfigurationIssue::ForeignTask {
                    task: task.id.clone(),
                    expected: self.id.clone(),
                    found: task.workflow_id.clone(),
                });
            }
        }

        let mut by_order: BTreeMap<u32, Vec<&TaskDefinition>> = BTreeMap::new();
        for task in self.tasks_in_order() {
            by_order.entry(task.sequence_order).or_default().push(task);
        }
        for (order, stage) in &by_order {
            if let [first, rest @ ..] = stage.as_slice() {
                for other in rest {
                    let grouped = first.parallel_group.is_some()
                        && first.parallel_group == other.parallel_group;
                    if !grouped {
                        issues.push(ConfigurationIssue::DuplicateSequenceOrder {
                            order: *order,
                            first: first.id.clone(),
                            second: other.id.clone(),
                        });
                    }
                }
            }
        }

        let mut group_orders: BTreeMap<&ParallelGroupId, u32> = BTreeMap::new();
        for task in self.tasks_in_order() {
            if let Some(group) = &task.parallel_group {
                match group_orders.get(group) {
                    Some(&order) if order != task.sequence_order => {
                        issues.push(ConfigurationIssue::SplitParallelGroup {
                            group: group.clone(),
                            first: order,
                            second: task.sequence_order,
                        });
                    }
                    Some(_) => {}
                    None => {
                        group_orders.insert(group, task.sequence_order);
                    }
                }
            }
        }

        issues
    }

    /// Issues local to one task: bad file dependencies, malformed decision
    /// outcomes, impossible consolidation bounds.
    pub fn task_issues(&self, task: &TaskDefinition) -> Vec<ConfigurationIssue> {
        let mut issues = Vec::new();

        let mut seen_sources = HashSet::new();
        for source in &task.source_task_ids {
            if !seen_sources.insert(source) {
                issues.push(ConfigurationIssue::DuplicateReference(task.id.clone()));
                continue;
            }
            match self.task(source) {
                None => issues.push(ConfigurationIssue::UnknownSourceTask {
                    task: task.id.clone(),
                    source_task: source.clone(),
                }),
                Some(upstream) if upstream.sequence_order >= task.sequence_order => {
                    issues.push(ConfigurationIssue::SourceNotUpstream {
                        task: task.id.clone(),
                        source_task: source.clone(),
                    })
                }
                Some(_) => {}
            }
        }

        if task.is_decision() && task.outcomes.is_empty() {
            issues.push(ConfigurationIssue::DecisionWithoutOutcomes(task.id.clone()));
        }
        if !task.is_decision() && !task.outcomes.is_empty() {
            issues.push(ConfigurationIssue::OutcomesOnNonDecision(task.id.clone()));
        }

        let mut seen_outcomes = HashSet::new();
        for outcome in &task.outcomes {
            if !seen_outcomes.insert(outcome.name.as_str()) {
                issues.push(ConfigurationIssue::DuplicateOutcome {
                    task: task.id.clone(),
                    outcome: outcome.name.clone(),
                });
            }
            if outcome.revision_strategy.reopens() && outcome.targets.is_empty() {
                issues.push(ConfigurationIssue::OutcomeWithoutTargets {
                    task: task.id.clone(),
                    outcome: outcome.name.clone(),
                });
            }
            let mut seen_targets = HashSet::new();
            for target in &outcome.targets {
                if !seen_targets.insert(target) {
                    issues.push(ConfigurationIssue::DuplicateReference(task.id.clone()));
                } else if self.task(target).is_none() {
                    issues.push(ConfigurationIssue::UnknownOutcomeTarget {
                        task: task.id.clone(),
                        outcome: outcome.name.clone(),
                        target: target.clone(),
                    });
                }
            }
            for target in self.reopen_range(task, outcome) {
                if !target.can_revisit(0) {
                    issues.push(ConfigurationIssue::UnrevisableTarget {
                        task: task.id.clone(),
                        outcome: outcome.name.clone(),
                        target: target.id.clone(),
                    });
                }
            }
            if outcome.auto_escalate && outcome.escalation_role.is_none() {
                issues.push(ConfigurationIssue::MissingEscalationRole {
                    task: task.id.clone(),
                    outcome: outcome.name.clone(),
                });
            }
        }

        if let Some(max) = task.consolidation.max_file_selections {
            if task.consolidation.min_file_selections > max {
                issues.push(ConfigurationIssue::InvalidSelectionBounds {
                    task: task.id.clone(),
                    min: task.consolidation.min_file_selections,
                    max,
                });
            }
        }

        issues
    }
}

impl WorkflowDefinition {
    /// Tasks an outcome of `decision` can reopen. Only tasks up to the
    /// decision's own stage count; later stages are still pending when it
    /// is made.
    fn reopen_range<'a>(
        &'a self,
        decision: &TaskDefinition,
        outcome: &DecisionOutcome,
    ) -> Vec<&'a TaskDefinition> {
        let targets: Vec<&TaskDefinition> =
            outcome.targets.iter().filter_map(|id| self.task(id)).collect();
        let in_reach = |t: &&TaskDefinition| t.sequence_order <= decision.sequence_order;
        match outcome.revision_strategy {
            RevisionStrategy::None => Vec::new(),
            RevisionStrategy::Selective => targets.into_iter().filter(in_reach).collect(),
            RevisionStrategy::Cascade => match targets.iter().map(|t| t.sequence_order).min() {
                Some(lowest) => self
                    .tasks_in_order()
                    .into_iter()
                    .filter(|t| t.sequence_order >= lowest)
                    .filter(in_reach)
                    .collect(),
                None => Vec::new(),
            },
        }
    }
}

// ── Task Definition ──────────────────────────────────────────────────

/// One step of a workflow definition
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// Identifier, unique within the workflow
    pub id: TaskDefinitionId,
    /// Owning workflow
    #[serde(default = "empty_workflow_id")]
    pub workflow_id: WorkflowDefinitionId,
    /// Human-readable name
    #[serde(default)]
    pub name: String,
    /// Position in the sequence; shared only inside a parallel group
    pub sequence_order: u32,
    /// What kind of work the task is
    pub kind: TaskKind,
    /// The role whose members may perform this task
    pub assignee_role: RoleId,
    /// Upstream tasks whose files this task may read
    #[serde(default, deserialize_with = "task_id_list::deserialize")]
    pub source_task_ids: Vec<TaskDefinitionId>,
    /// Whether the task may introduce files beyond its sources
    #[serde(default = "default_true")]
    pub allow_new_files: bool,
    /// Parallel group membership
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_group: Option<ParallelGroupId>,
    /// Consolidation policy (used by consolidate tasks)
    #[serde(default)]
    pub consolidation: ConsolidationPolicy,
    /// Declared outcomes (decision tasks only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outcomes: Vec<DecisionOutcome>,
    /// Whether a decision may send the task back for revision
    #[serde(default)]
    pub revisitable: bool,
    /// How many times the task may be revised
    #[serde(default)]
    pub max_revisits: u32,
    /// Task-specific thresholds; unset ones fall back to the workflow
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timing: Option<TimingPolicy>,
}

fn empty_workflow_id() -> WorkflowDefinitionId {
    WorkflowDefinitionId::new("")
}

fn default_true() -> bool {
    true
}

impl TaskDefinition {
    /// Create a task definition. It is adopted by a workflow in `add_task`.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        sequence_order: u32,
        kind: TaskKind,
        assignee_role: RoleId,
    ) -> Self {
        Self {
            id: TaskDefinitionId::new(id),
            workflow_id: empty_workflow_id(),
            name: name.into(),
            sequence_order,
            kind,
            assignee_role,
            source_task_ids: Vec::new(),
            allow_new_files: true,
            parallel_group: None,
            consolidation: ConsolidationPolicy::default(),
            outcomes: Vec::new(),
            revisitable: false,
            max_revisits: 0,
            timing: None,
        }
    }

    /// Create an upload task
    pub fn upload(id: impl Into<String>, order: u32, role: RoleId) -> Self {
        Self::new(id, "Upload", order, TaskKind::Upload, role)
    }

    /// Create an update task
    pub fn update(id: impl Into<String>, order: u32, role: RoleId) -> Self {
        Self::new(id, "Update", order, TaskKind::Update, role)
    }

    /// Create a consolidation task
    pub fn consolidate(id: impl Into<String>, order: u32, role: RoleId) -> Self {
        Self::new(id, "Consolidate", order, TaskKind::Consolidate, role)
    }

    /// Create a decision task
    pub fn decision(id: impl Into<String>, order: u32, role: RoleId) -> Self {
        Self::new(id, "Decision", order, TaskKind::Decision, role)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.source_task_ids = sources.into_iter().map(TaskDefinitionId::new).collect();
        self
    }

    pub fn with_new_files(mut self, allow: bool) -> Self {
        self.allow_new_files = allow;
        self
    }

    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.parallel_group = Some(ParallelGroupId::new(group));
        self
    }

    pub fn with_consolidation(mut self, policy: ConsolidationPolicy) -> Self {
        self.consolidation = policy;
        self
    }

    pub fn with_outcome(mut self, outcome: DecisionOutcome) -> Self {
        self.outcomes.push(outcome);
        self
    }

    /// Allow up to `max_revisits` revisions
    pub fn revisitable(mut self, max_revisits: u32) -> Self {
        self.revisitable = true;
        self.max_revisits = max_revisits;
        self
    }

    pub fn with_timing(mut self, timing: TimingPolicy) -> Self {
        self.timing = Some(timing);
        self
    }

    pub fn is_decision(&self) -> bool {
        self.kind == TaskKind::Decision
    }

    /// Look up a declared outcome by name
    pub fn outcome(&self, name: &str) -> Option<&DecisionOutcome> {
        self.outcomes.iter().find(|o| o.name == name)
    }

    /// Whether a task that has been revised `revisit_count` times may be
    /// revised again
    pub fn can_revisit(&self, revisit_count: u32) -> bool {
        self.revisitable && revisit_count < self.max_revisits
    }
}

/// The kind of work a task performs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskKind {
    /// Introduces new files
    Upload,
    /// Produces new versions of existing files
    Update,
    /// Merges selected files into one derived artifact
    Consolidate,
    /// Records an outcome that may branch or send work back
    Decision,
}

// ── Consolidation ────────────────────────────────────────────────────

/// How a consolidation task picks its inputs
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidationPolicy {
    #[serde(default)]
    pub mode: ConsolidationMode,
    #[serde(default)]
    pub strategy: SelectionStrategy,
    #[serde(default = "default_min_selections")]
    pub min_file_selections: u32,
    /// `None` means unbounded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_file_selections: Option<u32>,
}

fn default_min_selections() -> u32 {
    1
}

impl Default for ConsolidationPolicy {
    fn default() -> Self {
        Self {
            mode: ConsolidationMode::Manual,
            strategy: SelectionStrategy::All,
            min_file_selections: default_min_selections(),
            max_file_selections: None,
        }
    }
}

impl ConsolidationPolicy {
    pub fn new(mode: ConsolidationMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn with_bounds(mut self, min: u32, max: Option<u32>) -> Self {
        self.min_file_selections = min;
        self.max_file_selections = max;
        self
    }

    pub fn with_strategy(mut self, strategy: SelectionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Whether a selection of `count` files is within bounds
    pub fn accepts(&self, count: usize) -> bool {
        let min_ok = count >= self.min_file_selections as usize;
        let max_ok = self
            .max_file_selections
            .map_or(true, |max| count <= max as usize);
        min_ok && max_ok
    }

    pub fn allows_manual(&self) -> bool {
        matches!(self.mode, ConsolidationMode::Manual | ConsolidationMode::Hybrid)
    }

    pub fn allows_auto(&self) -> bool {
        matches!(self.mode, ConsolidationMode::Auto | ConsolidationMode::Hybrid)
    }
}

/// Who chooses the files to consolidate
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsolidationMode {
    /// The performer selects the files
    #[default]
    Manual,
    /// The engine selects the files
    Auto,
    /// Either
    Hybrid,
}

/// How automatic consolidation selects among candidates
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SelectionStrategy {
    /// Every candidate file
    #[default]
    All,
    /// Most recently created candidates first, up to the maximum
    NewestFirst,
}

// ── Decision Outcomes ────────────────────────────────────────────────

/// A named outcome a decision task may record
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionOutcome {
    /// Outcome name, e.g. `APPROVED` or `NEEDS_REVISION`
    pub name: String,
    /// Tasks the outcome routes to
    #[serde(default, deserialize_with = "task_id_list::deserialize")]
    pub targets: Vec<TaskDefinitionId>,
    #[serde(default)]
    pub revision_strategy: RevisionStrategy,
    /// Escalate the instance after routing
    #[serde(default)]
    pub auto_escalate: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation_role: Option<RoleId>,
}

impl DecisionOutcome {
    /// An outcome that lets the sequence continue normally
    pub fn advance(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            targets: Vec::new(),
            revision_strategy: RevisionStrategy::None,
            auto_escalate: false,
            escalation_role: None,
        }
    }

    /// An outcome that reopens exactly the named tasks
    pub fn selective<I, S>(name: impl Into<String>, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            targets: targets.into_iter().map(TaskDefinitionId::new).collect(),
            revision_strategy: RevisionStrategy::Selective,
            ..Self::advance(name)
        }
    }

    /// An outcome that reopens everything from the earliest target onward
    pub fn cascade<I, S>(name: impl Into<String>, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            revision_strategy: RevisionStrategy::Cascade,
            ..Self::selective(name, targets)
        }
    }

    pub fn with_auto_escalate(mut self, role: RoleId) -> Self {
        self.auto_escalate = true;
        self.escalation_role = Some(role);
        self
    }
}

/// How a decision outcome sends work back
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RevisionStrategy {
    /// No revision; sequencing continues
    #[default]
    None,
    /// Reopen exactly the target tasks
    Selective,
    /// Reopen every task from the earliest target's order onward
    Cascade,
}

impl RevisionStrategy {
    pub fn reopens(&self) -> bool {
        !matches!(self, Self::None)
    }
}

// ── Timing ───────────────────────────────────────────────────────────

/// Reminder and escalation thresholds, all in minutes
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingPolicy {
    /// Remind this long before the due time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reminder_before_due_minutes: Option<u32>,
    /// Escalate once active longer than this
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation_after_minutes: Option<u32>,
    /// Due this long after starting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_minutes: Option<u32>,
}

impl TimingPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn escalate_after(mut self, minutes: u32) -> Self {
        self.escalation_after_minutes = Some(minutes);
        self
    }

    pub fn due_after(mut self, minutes: u32) -> Self {
        self.due_minutes = Some(minutes);
        self
    }

    pub fn remind_before(mut self, minutes: u32) -> Self {
        self.reminder_before_due_minutes = Some(minutes);
        self
    }

    /// Fill unset thresholds from `fallback`
    pub fn or(&self, fallback: &TimingPolicy) -> TimingPolicy {
        TimingPolicy {
            reminder_before_due_minutes: self
                .reminder_before_due_minutes
                .or(fallback.reminder_before_due_minutes),
            escalation_after_minutes: self
                .escalation_after_minutes
                .or(fallback.escalation_after_minutes),
            due_minutes: self.due_minutes.or(fallback.due_minutes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role(name: &str) -> RoleId {
        RoleId::new(name)
    }

    fn make_review_workflow() -> WorkflowDefinition {
        let mut wf = WorkflowDefinition::with_id(WorkflowDefinitionId::new("wf-1"), "Quarterly Report")
            .with_description("Collect, merge and approve the quarterly report");

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
                ),
        )
        .unwrap();
        wf.add_task(
            TaskDefinition::decision("5", 4, role("approver"))
                .with_outcome(DecisionOutcome::advance("APPROVED"))
                .with_outcome(DecisionOutcome::selective("NEEDS_REVISION", ["2", "3"])),
        )
        .unwrap();
        wf
    }

    #[test]
    fn test_validate_valid_workflow() {
        let wf = make_review_workflow();
        assert!(wf.validate().is_ok());
        assert_eq!(wf.task_count(), 5);
        assert_eq!(wf.stage_orders().len(), 4);
    }

    #[test]
    fn test_add_task_adopts_workflow() {
        let wf = make_review_workflow();
        assert!(wf.tasks.iter().all(|t| t.workflow_id == wf.id));
    }

    #[test]
    fn test_duplicate_task_id() {
        let mut wf = make_review_workflow();
        let result = wf.add_task(TaskDefinition::upload("1", 9, role("author")));
        assert!(matches!(
            result,
            Err(WorkflowError::Configuration(ConfigurationIssue::DuplicateTaskId(_)))
        ));
    }

    #[test]
    fn test_no_tasks() {
        let wf = WorkflowDefinition::new("Empty");
        assert!(matches!(
            wf.validate(),
            Err(WorkflowError::Configuration(ConfigurationIssue::NoTasks(_)))
        ));
    }

    #[test]
    fn test_duplicate_order_outside_group() {
        let mut wf = WorkflowDefinition::new("Tied");
        wf.add_task(TaskDefinition::upload("a", 1, role("r"))).unwrap();
        wf.add_task(TaskDefinition::upload("b", 1, role("r"))).unwrap();
        assert!(matches!(
            wf.validate(),
            Err(WorkflowError::Configuration(
                ConfigurationIssue::DuplicateSequenceOrder { order: 1, .. }
            ))
        ));
    }

    #[test]
    fn test_parallel_group_split_across_orders() {
        let mut wf = WorkflowDefinition::new("Split");
        wf.add_task(TaskDefinition::upload("a", 1, role("r")).in_group("g"))
            .unwrap();
        wf.add_task(TaskDefinition::upload("b", 2, role("r")).in_group("g"))
            .unwrap();
        assert!(matches!(
            wf.validate(),
            Err(WorkflowError::Configuration(
                ConfigurationIssue::SplitParallelGroup { .. }
            ))
        ));
    }

    #[test]
    fn test_source_must_be_upstream() {
        let mut wf = WorkflowDefinition::new("Backwards");
        wf.add_task(TaskDefinition::upload("a", 1, role("r")).with_sources(["b"]))
            .unwrap();
        wf.add_task(TaskDefinition::upload("b", 2, role("r"))).unwrap();
        let issues = wf.task_issues(wf.task(&TaskDefinitionId::new("a")).unwrap());
        assert!(matches!(
            issues.as_slice(),
            [ConfigurationIssue::SourceNotUpstream { .. }]
        ));
    }

    #[test]
    fn test_sibling_in_group_is_not_upstream() {
        let mut wf = WorkflowDefinition::new("Siblings");
        wf.add_task(TaskDefinition::upload("a", 1, role("r")).in_group("g"))
            .unwrap();
        wf.add_task(
            TaskDefinition::upload("b", 1, role("r"))
                .in_group("g")
                .with_sources(["a"]),
        )
        .unwrap();
        assert!(wf.validate().is_err());
    }

    #[test]
    fn test_unknown_source() {
        let mut wf = WorkflowDefinition::new("Dangling");
        wf.add_task(TaskDefinition::upload("a", 1, role("r")).with_sources(["ghost"]))
            .unwrap();
        assert!(matches!(
            wf.validate(),
            Err(WorkflowError::Configuration(
                ConfigurationIssue::UnknownSourceTask { .. }
            ))
        ));
    }

    #[test]
    fn test_decision_rules() {
        let mut wf = WorkflowDefinition::new("Decisions");
        wf.add_task(TaskDefinition::upload("a", 1, role("r"))).unwrap();
        wf.add_task(TaskDefinition::decision("d", 2, role("r"))).unwrap();
        assert!(matches!(
            wf.validate(),
            Err(WorkflowError::Configuration(
                ConfigurationIssue::DecisionWithoutOutcomes(_)
            ))
        ));

        let mut wf = WorkflowDefinition::new("Decisions");
        wf.add_task(TaskDefinition::upload("a", 1, role("r"))).unwrap();
        wf.add_task(
            TaskDefinition::decision("d", 2, role("r"))
                .with_outcome(DecisionOutcome::selective("REDO", ["missing"])),
        )
        .unwrap();
        assert!(matches!(
            wf.validate(),
            Err(WorkflowError::Configuration(
                ConfigurationIssue::UnknownOutcomeTarget { .. }
            ))
        ));

        let mut wf = WorkflowDefinition::new("Decisions");
        wf.add_task(
            TaskDefinition::upload("a", 1, role("r"))
                .with_outcome(DecisionOutcome::advance("OK")),
        )
        .unwrap();
        assert!(matches!(
            wf.validate(),
            Err(WorkflowError::Configuration(
                ConfigurationIssue::OutcomesOnNonDecision(_)
            ))
        ));
    }

    #[test]
    fn test_revising_outcome_needs_targets() {
        let mut wf = WorkflowDefinition::new("No targets");
        wf.add_task(
            TaskDefinition::decision("d", 1, role("r")).with_outcome(DecisionOutcome {
                revision_strategy: RevisionStrategy::Cascade,
                ..DecisionOutcome::advance("REDO")
            }),
        )
        .unwrap();
        assert!(matches!(
            wf.validate(),
            Err(WorkflowError::Configuration(
                ConfigurationIssue::OutcomeWithoutTargets { .. }
            ))
        ));
    }

    #[test]
    fn test_revising_outcome_needs_revisitable_range() {
        let mut wf = make_review_workflow();
        let decision = wf
            .tasks
            .iter_mut()
            .find(|t| t.id.as_str() == "5")
            .unwrap();
        decision
            .outcomes
            .push(DecisionOutcome::cascade("START_OVER", ["2"]));
        // The cascade reaches the decision task itself
        assert!(matches!(
            wf.validate(),
            Err(WorkflowError::Configuration(
                ConfigurationIssue::UnrevisableTarget { ref target, .. }
            )) if target.as_str() == "4"
        ));

        for task in wf.tasks.iter_mut().filter(|t| ["4", "5"].contains(&t.id.as_str())) {
            task.revisitable = true;
            task.max_revisits = 1;
        }
        assert!(wf.validate().is_ok());

        let decision = wf.tasks.iter_mut().find(|t| t.id.as_str() == "5").unwrap();
        decision.max_revisits = 0;
        assert!(matches!(
            wf.validate(),
            Err(WorkflowError::Configuration(
                ConfigurationIssue::UnrevisableTarget { ref target, .. }
            )) if target.as_str() == "5"
        ));
    }

    #[test]
    fn test_selective_outcome_needs_revisitable_targets() {
        let mut wf = make_review_workflow();
        let editor = wf.tasks.iter_mut().find(|t| t.id.as_str() == "2").unwrap();
        editor.revisitable = false;
        let issues = wf.task_issues(wf.task(&TaskDefinitionId::new("5")).unwrap());
        assert_eq!(
            issues,
            vec![ConfigurationIssue::UnrevisableTarget {
                task: TaskDefinitionId::new("5"),
                outcome: "NEEDS_REVISION".into(),
                target: TaskDefinitionId::new("2"),
            }]
        );
    }

    #[test]
    fn test_auto_escalate_needs_role() {
        let mut wf = WorkflowDefinition::new("Escalating");
        wf.add_task(
            TaskDefinition::decision("d", 1, role("r")).with_outcome(DecisionOutcome {
                auto_escalate: true,
                ..DecisionOutcome::advance("REJECTED")
            }),
        )
        .unwrap();
        assert!(matches!(
            wf.validate(),
            Err(WorkflowError::Configuration(
                ConfigurationIssue::MissingEscalationRole { .. }
            ))
        ));
    }

    #[test]
    fn test_selection_bounds() {
        let mut wf = WorkflowDefinition::new("Bounds");
        wf.add_task(
            TaskDefinition::consolidate("c", 1, role("r")).with_consolidation(
                ConsolidationPolicy::new(ConsolidationMode::Manual).with_bounds(4, Some(2)),
            ),
        )
        .unwrap();
        assert!(matches!(
            wf.validate(),
            Err(WorkflowError::Configuration(
                ConfigurationIssue::InvalidSelectionBounds { min: 4, max: 2, .. }
            ))
        ));
    }

    #[test]
    fn test_policy_accepts() {
        let policy = ConsolidationPolicy::new(ConsolidationMode::Manual).with_bounds(2, Some(5));
        assert!(!policy.accepts(1));
        assert!(policy.accepts(2));
        assert!(policy.accepts(5));
        assert!(!policy.accepts(6));

        let unbounded = ConsolidationPolicy::default();
        assert!(unbounded.accepts(1000));
        assert!(!unbounded.accepts(0));
    }

    #[test]
    fn test_can_revisit() {
        let task = TaskDefinition::update("2", 2, role("r")).revisitable(1);
        assert!(task.can_revisit(0));
        assert!(!task.can_revisit(1));

        let fixed = TaskDefinition::update("3", 3, role("r"));
        assert!(!fixed.can_revisit(0));
    }

    #[test]
    fn test_timing_override() {
        let mut wf = WorkflowDefinition::new("Timed")
            .with_timing(TimingPolicy::new().escalate_after(60).due_after(240));
        wf.add_task(TaskDefinition::upload("a", 1, role("r"))).unwrap();
        wf.add_task(
            TaskDefinition::upload("b", 2, role("r"))
                .with_timing(TimingPolicy::new().escalate_after(5)),
        )
        .unwrap();

        let a = wf.task(&TaskDefinitionId::new("a")).unwrap();
        let b = wf.task(&TaskDefinitionId::new("b")).unwrap();
        assert_eq!(wf.timing_for(a).escalation_after_minutes, Some(60));
        assert_eq!(wf.timing_for(b).escalation_after_minutes, Some(5));
        // Unset thresholds come from the workflow
        assert_eq!(wf.timing_for(b).due_minutes, Some(240));
        assert_eq!(wf.timing_for(b).reminder_before_due_minutes, None);
    }

    #[test]
    fn test_from_json_with_legacy_lists() {
        let json = r#"{
            "id": "contract-review",
            "name": "Contract Review",
            "tasks": [
                { "id": "1", "sequence_order": 1, "kind": "UPLOAD", "assignee_role": "author",
                  "revisitable": true, "max_revisits": 2 },
                { "id": "2", "sequence_order": 2, "kind": "UPDATE", "assignee_role": "legal",
                  "source_task_ids": "1", "allow_new_files": false,
                  "revisitable": true, "max_revisits": 2 },
                { "id": "3", "sequence_order": 3, "kind": "DECISION", "assignee_role": "approver",
                  "revisitable": true, "max_revisits": 2,
                  "outcomes": [
                    { "name": "APPROVED" },
                    { "name": "NEEDS_REVISION", "targets": "1, 2", "revision_strategy": "CASCADE" }
                  ] }
            ]
        }"#;

        let wf = WorkflowDefinition::from_json(json).unwrap();
        assert!(wf.validate().is_ok());
        assert!(!wf.active);
        let decision = wf.task(&TaskDefinitionId::new("3")).unwrap();
        let outcome = decision.outcome("NEEDS_REVISION").unwrap();
        assert_eq!(outcome.revision_strategy, RevisionStrategy::Cascade);
        assert_eq!(outcome.targets.len(), 2);
        assert!(wf.tasks.iter().all(|t| t.workflow_id == wf.id));
    }

    #[test]
    fn test_tasks_in_order() {
        let wf = make_review_workflow();
        let order: Vec<&str> = wf.tasks_in_order().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(order, vec!["1", "2", "3", "4", "5"]);
    }
}
