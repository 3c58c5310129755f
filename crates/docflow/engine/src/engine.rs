//! Workflow engine: the entry point front ends call
//!
//! Every mutating operation follows the same shape:
//! 1. resolve the owning instance
//! 2. take that instance's lock
//! 3. load a snapshot under the lock
//! 4. apply the change through the components
//! 5. commit the snapshot's change set in one store call
//!
//! Read-only queries load a snapshot without locking and may observe
//! state that is about to change.

use crate::attention_monitor::{AttentionItem, AttentionMonitor};
use crate::consolidation_resolver::{ConsolidationPreview, ConsolidationResolver};
use crate::decision_router::{DecisionRouter, RoutingOption};
use crate::definition_registry::DefinitionRegistry;
use crate::dependency_resolver::DependencyResolver;
use crate::locks::{InstanceGuard, InstanceLocks};
use crate::snapshot::InstanceSnapshot;
use crate::store::{CalendarOracle, Directory, Store};
use crate::task_sequencer::{Advance, TaskSequencer};
use chrono::{DateTime, NaiveDate, Utc};
use docflow_types::*;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

// ── Results ──────────────────────────────────────────────────────────

/// An instance with all of its tasks
#[derive(Clone, Debug, Serialize)]
pub struct InstanceView {
    pub instance: WorkflowInstance,
    /// Sorted by sequence order
    pub tasks: Vec<InstanceTask>,
}

impl InstanceView {
    /// The instance task materialized from a task definition
    pub fn task(&self, definition_id: &str) -> Option<&InstanceTask> {
        self.tasks
            .iter()
            .find(|t| t.task_definition_id.as_str() == definition_id)
    }

    pub fn eligible(&self) -> Vec<&InstanceTask> {
        self.tasks.iter().filter(|t| t.eligible).collect()
    }
}

/// The outcome of completing a task
#[derive(Clone, Debug, Serialize)]
pub struct TaskTransition {
    pub task: InstanceTask,
    pub instance: WorkflowInstance,
    /// Tasks that became eligible
    pub activated: Vec<InstanceTask>,
    /// Tasks a decision sent back to PENDING
    pub reopened: Vec<InstanceTask>,
    pub decision: Option<InstanceDecisionOutcome>,
    pub instance_completed: bool,
}

/// A consolidated artifact and the completion it caused
#[derive(Clone, Debug, Serialize)]
pub struct Consolidation {
    pub file: InstanceFile,
    pub transition: TaskTransition,
}

/// Result of a calendar-gated start
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ScheduledStart {
    Started(InstanceView),
    /// Not a run date; nothing was started
    Deferred { next_date: Option<NaiveDate> },
}

/// Revision state of one task
#[derive(Clone, Debug, Serialize)]
pub struct TaskRevisions {
    pub task_id: InstanceTaskId,
    pub task_definition_id: TaskDefinitionId,
    pub revisit_count: u32,
    pub can_be_revised: bool,
}

/// Decisions of an instance and the revisions they caused
#[derive(Clone, Debug, Serialize)]
pub struct RevisionHistory {
    pub instance_id: WorkflowInstanceId,
    /// In the order they were made
    pub decisions: Vec<InstanceDecisionOutcome>,
    pub tasks: Vec<TaskRevisions>,
}

/// What one attention sweep did
#[derive(Clone, Debug, Default, Serialize)]
pub struct SweepReport {
    pub escalated_tasks: Vec<InstanceTaskId>,
    pub escalated_instances: Vec<WorkflowInstanceId>,
    pub reminders: Vec<AttentionItem>,
    /// Overdue items left alone (no target, or state moved on)
    pub skipped: usize,
}

// ── Engine ───────────────────────────────────────────────────────────

/// Drives workflow instances on top of the collaborators
pub struct WorkflowEngine {
    store: Arc<dyn Store>,
    directory: Arc<dyn Directory>,
    calendar: Arc<dyn CalendarOracle>,
    registry: DefinitionRegistry,
    locks: InstanceLocks,
    dependencies: DependencyResolver,
    consolidation: ConsolidationResolver,
    sequencer: TaskSequencer,
    router: DecisionRouter,
    monitor: AttentionMonitor,
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("locks", &self.locks.len())
            .finish_non_exhaustive()
    }
}

impl WorkflowEngine {
    pub fn new(
        store: Arc<dyn Store>,
        directory: Arc<dyn Directory>,
        calendar: Arc<dyn CalendarOracle>,
    ) -> Self {
        let dependencies = DependencyResolver::new();
        let sequencer = TaskSequencer::new(dependencies.clone());
        Self {
            registry: DefinitionRegistry::new(store.clone()),
            store,
            directory,
            calendar,
            locks: InstanceLocks::new(),
            consolidation: ConsolidationResolver::new(dependencies.clone()),
            router: DecisionRouter::new(sequencer.clone()),
            monitor: AttentionMonitor::new(),
            dependencies,
            sequencer,
        }
    }

    // ── Definition Management ────────────────────────────────────────

    /// Validate and store a workflow definition
    pub async fn register_definition(
        &self,
        definition: WorkflowDefinition,
    ) -> WorkflowResult<WorkflowDefinitionId> {
        self.registry.register(definition).await
    }

    pub async fn activate_definition(
        &self,
        id: &WorkflowDefinitionId,
    ) -> WorkflowResult<WorkflowDefinition> {
        self.registry.activate(id).await
    }

    pub async fn deactivate_definition(
        &self,
        id: &WorkflowDefinitionId,
    ) -> WorkflowResult<WorkflowDefinition> {
        self.registry.deactivate(id).await
    }

    pub async fn get_definition(
        &self,
        id: &WorkflowDefinitionId,
    ) -> WorkflowResult<WorkflowDefinition> {
        self.registry.get(id).await
    }

    pub async fn list_definitions(&self) -> WorkflowResult<Vec<WorkflowDefinition>> {
        self.registry.list().await
    }

    // ── Instance Lifecycle ───────────────────────────────────────────

    /// Start a new instance of an active definition. The first stage
    /// becomes eligible immediately.
    pub async fn start_instance(
        &self,
        definition_id: &WorkflowDefinitionId,
        starter: Identity,
    ) -> WorkflowResult<InstanceView> {
        let definition = self.registry.get(definition_id).await?;
        self.instantiate(definition, starter, None).await
    }

    /// Start an instance only if `date` is a run date of `calendar`
    pub async fn start_scheduled_instance(
        &self,
        definition_id: &WorkflowDefinitionId,
        calendar: &CalendarId,
        date: NaiveDate,
        starter: Identity,
    ) -> WorkflowResult<ScheduledStart> {
        let definition = self.registry.get(definition_id).await?;
        if self.calendar.is_valid_run_date(calendar, date).await? {
            let view = self.instantiate(definition, starter, Some(date)).await?;
            return Ok(ScheduledStart::Started(view));
        }

        let next_date = self.calendar.next_valid_date(calendar, date).await?;
        tracing::info!(
            definition_id = %definition_id,
            calendar = %calendar,
            date = %date,
            next_date = ?next_date,
            "Not a run date, start deferred"
        );
        Ok(ScheduledStart::Deferred { next_date })
    }

    async fn instantiate(
        &self,
        definition: WorkflowDefinition,
        starter: Identity,
        scheduled_for: Option<NaiveDate>,
    ) -> WorkflowResult<InstanceView> {
        if !definition.active {
            return Err(WorkflowError::InvalidTransition {
                entity: definition.id.to_string(),
                expected: "an active definition".into(),
                actual: "inactive".into(),
            });
        }
        if let Some(issue) = definition.structural_issues().into_iter().next() {
            return Err(WorkflowError::Configuration(issue));
        }

        let now = Utc::now();
        let mut assignees = HashMap::new();
        for task in &definition.tasks {
            if let Some(identity) = self.directory.resolve_assignee(&task.assignee_role).await? {
                assignees.insert(task.id.clone(), identity);
            }
        }

        let misconfigured = definition
            .tasks
            .iter()
            .any(|task| !definition.task_issues(task).is_empty());
        let escalate_to = if misconfigured {
            self.directory.resolve_escalation_target(&starter).await?
        } else {
            None
        };

        let mut instance =
            WorkflowInstance::new(definition.id.clone(), definition.version, starter, now);
        instance.scheduled_for = scheduled_for;
        let tasks = self.sequencer.materialize(
            &definition,
            &instance,
            &assignees,
            escalate_to.as_ref(),
            now,
        );
        if misconfigured {
            instance.status = InstanceStatus::Escalated;
            instance.escalated_on = escalate_to.as_ref().map(|_| now);
            instance.escalated_to = escalate_to;
        }

        let instance_id = instance.id.clone();
        let _guard = self.locks.acquire(&instance_id).await;
        let mut snapshot = InstanceSnapshot::fresh(definition, instance, tasks);
        let advance = self.sequencer.refresh(&mut snapshot, now);
        let view = Self::view(&snapshot);
        self.persist(snapshot).await?;

        tracing::info!(
            instance_id = %instance_id,
            definition = %view.instance.definition_id,
            tasks = view.tasks.len(),
            eligible = advance.activated.len(),
            status = %view.instance.status,
            "Workflow instance started"
        );
        Ok(view)
    }

    /// Cancel a non-terminal instance
    pub async fn cancel_instance(
        &self,
        instance_id: &WorkflowInstanceId,
        reason: impl Into<String>,
    ) -> WorkflowResult<WorkflowInstance> {
        let (_guard, mut snapshot) = self.locked(instance_id).await?;
        self.sequencer.cancel(&mut snapshot, reason, Utc::now())?;
        let instance = snapshot.instance().clone();
        self.persist(snapshot).await?;
        Ok(instance)
    }

    /// True iff no task of the instance is PENDING or IN_PROGRESS
    pub async fn is_complete(&self, instance_id: &WorkflowInstanceId) -> WorkflowResult<bool> {
        if self.store.get_instance(instance_id).await?.is_none() {
            return Err(WorkflowError::InstanceNotFound(instance_id.clone()));
        }
        let tasks = self.store.list_instance_tasks_by_instance(instance_id).await?;
        Ok(self.sequencer.is_complete(&tasks))
    }

    pub async fn get_instance(&self, instance_id: &WorkflowInstanceId) -> WorkflowResult<InstanceView> {
        let instance = self
            .store
            .get_instance(instance_id)
            .await?
            .ok_or_else(|| WorkflowError::InstanceNotFound(instance_id.clone()))?;
        let tasks = self.store.list_instance_tasks_by_instance(instance_id).await?;
        Ok(InstanceView { instance, tasks })
    }

    pub async fn list_instances(&self) -> WorkflowResult<Vec<WorkflowInstance>> {
        Ok(self.store.list_instances().await?)
    }

    pub async fn get_instance_task(&self, task_id: &InstanceTaskId) -> WorkflowResult<InstanceTask> {
        self.store
            .get_instance_task(task_id)
            .await?
            .ok_or_else(|| WorkflowError::TaskNotFound(task_id.clone()))
    }

    // ── Task Lifecycle ───────────────────────────────────────────────

    /// PENDING → IN_PROGRESS
    pub async fn start_task(&self, task_id: &InstanceTaskId) -> WorkflowResult<InstanceTask> {
        let (_guard, mut snapshot) = self.locked_for_task(task_id).await?;
        self.sequencer.start(&mut snapshot, task_id, Utc::now())?;
        let task = snapshot.task(task_id)?.clone();
        self.persist(snapshot).await?;
        Ok(task)
    }

    /// IN_PROGRESS → COMPLETED. Decision tasks need an outcome; other
    /// tasks must not be given one.
    pub async fn complete_task(
        &self,
        task_id: &InstanceTaskId,
        outcome: Option<&str>,
    ) -> WorkflowResult<TaskTransition> {
        self.finish_task(task_id, outcome, None, None).await
    }

    /// Record a decision with comments and complete the decision task
    pub async fn make_decision(
        &self,
        task_id: &InstanceTaskId,
        outcome: &str,
        comments: Option<String>,
        actor: Identity,
    ) -> WorkflowResult<TaskTransition> {
        self.finish_task(task_id, Some(outcome), comments, Some(actor))
            .await
    }

    async fn finish_task(
        &self,
        task_id: &InstanceTaskId,
        outcome: Option<&str>,
        comments: Option<String>,
        actor: Option<Identity>,
    ) -> WorkflowResult<TaskTransition> {
        let (_guard, mut snapshot) = self.locked_for_task(task_id).await?;
        let now = Utc::now();
        self.sequencer.ensure_in_progress(&snapshot, task_id)?;
        let is_decision = snapshot.definition_of(task_id)?.is_decision();

        let transition = match (is_decision, outcome) {
            (true, None) => return Err(WorkflowError::MissingOutcome(task_id.clone())),
            (false, Some(outcome)) => {
                return Err(WorkflowError::UnknownOutcome {
                    task: task_id.clone(),
                    outcome: outcome.to_string(),
                })
            }
            (false, None) => {
                let advance = self.sequencer.complete(&mut snapshot, task_id, now)?;
                Self::transition(&snapshot, task_id, &advance, &[], None)?
            }
            (true, Some(outcome)) => {
                let actor = match actor {
                    Some(actor) => actor,
                    None => snapshot
                        .task(task_id)?
                        .assignee
                        .clone()
                        .unwrap_or_else(|| snapshot.instance().started_by.clone()),
                };
                let routing =
                    self.router
                        .route(&mut snapshot, task_id, outcome, comments, &actor, now)?;
                if let Some(role) = &routing.escalation_role {
                    self.escalate_to_role(&mut snapshot, role, now).await?;
                }
                Self::transition(
                    &snapshot,
                    task_id,
                    &routing.advance,
                    &routing.reopened,
                    Some(routing.decision.clone()),
                )?
            }
        };

        self.persist(snapshot).await?;
        Ok(transition)
    }

    async fn escalate_to_role(
        &self,
        snapshot: &mut InstanceSnapshot,
        role: &RoleId,
        now: DateTime<Utc>,
    ) -> WorkflowResult<()> {
        if snapshot.instance().is_terminal() {
            tracing::warn!(
                instance_id = %snapshot.instance().id,
                role = %role,
                "Instance finished before auto-escalation, skipping"
            );
            return Ok(());
        }
        // A role without a resolvable member is addressed as a group
        let target = self
            .directory
            .resolve_assignee(role)
            .await?
            .unwrap_or_else(|| Identity::new(role.as_str()));
        self.monitor.escalate_instance(snapshot, &target, now)?;
        Ok(())
    }

    /// IN_PROGRESS → REJECTED
    pub async fn fail_task(
        &self,
        task_id: &InstanceTaskId,
        reason: impl Into<String>,
    ) -> WorkflowResult<InstanceTask> {
        let (_guard, mut snapshot) = self.locked_for_task(task_id).await?;
        self.sequencer.fail(&mut snapshot, task_id, reason)?;
        let task = snapshot.task(task_id)?.clone();
        self.persist(snapshot).await?;
        Ok(task)
    }

    // ── Files ────────────────────────────────────────────────────────

    /// Add a new file (version 1) to an IN_PROGRESS task
    pub async fn upload_file(
        &self,
        task_id: &InstanceTaskId,
        file_name: impl Into<String>,
        actor: Identity,
    ) -> WorkflowResult<InstanceFile> {
        let (_guard, mut snapshot) = self.locked_for_task(task_id).await?;
        self.sequencer.ensure_in_progress(&snapshot, task_id)?;
        match snapshot.definition_of(task_id)?.kind {
            TaskKind::Upload => {}
            TaskKind::Update | TaskKind::Consolidate => {
                self.dependencies
                    .ensure_new_files_allowed(&snapshot, task_id)?;
            }
            TaskKind::Decision => {
                return Err(WorkflowError::FileActionRejected {
                    task: task_id.clone(),
                    reason: "decision tasks do not take files".into(),
                })
            }
        }

        let task = snapshot.task(task_id)?;
        let file = InstanceFile {
            instance_file_id: InstanceFileId::generate(),
            version: 1,
            instance_id: task.instance_id.clone(),
            task_id: task.id.clone(),
            task_definition_id: task.task_definition_id.clone(),
            action: FileAction::Upload,
            file_name: file_name.into(),
            created_by: actor,
            created_at: Utc::now(),
            derived_from: Vec::new(),
            notes: None,
        };
        snapshot.add_file(file.clone())?;
        self.persist(snapshot).await?;

        tracing::info!(
            task_id = %task_id,
            file_id = %file.instance_file_id,
            "File uploaded"
        );
        Ok(file)
    }

    /// Write the next version of a file the task may act on
    pub async fn update_file(
        &self,
        task_id: &InstanceTaskId,
        file_id: &InstanceFileId,
        actor: Identity,
    ) -> WorkflowResult<InstanceFile> {
        let (_guard, mut snapshot) = self.locked_for_task(task_id).await?;
        self.sequencer.ensure_in_progress(&snapshot, task_id)?;
        let current = snapshot
            .files()
            .current(file_id)
            .cloned()
            .ok_or_else(|| WorkflowError::FileNotFound(file_id.clone()))?;

        match snapshot.definition_of(task_id)?.kind {
            TaskKind::Update => {
                self.dependencies
                    .ensure_legal_input(&snapshot, task_id, file_id)?;
            }
            TaskKind::Upload if snapshot.files().produced_by(task_id).contains(file_id) => {}
            kind => {
                return Err(WorkflowError::FileActionRejected {
                    task: task_id.clone(),
                    reason: format!("{:?} task cannot update file {}", kind, file_id),
                })
            }
        }

        let task = snapshot.task(task_id)?;
        let file = InstanceFile {
            instance_file_id: file_id.clone(),
            version: snapshot.files().next_version(file_id),
            instance_id: task.instance_id.clone(),
            task_id: task.id.clone(),
            task_definition_id: task.task_definition_id.clone(),
            action: FileAction::Update,
            file_name: current.file_name.clone(),
            created_by: actor,
            created_at: Utc::now(),
            derived_from: vec![current.version_ref()],
            notes: None,
        };
        snapshot.add_file(file.clone())?;
        self.persist(snapshot).await?;

        tracing::info!(
            task_id = %task_id,
            file_id = %file_id,
            version = file.version,
            "File updated"
        );
        Ok(file)
    }

    /// All retained versions of a file, ascending
    pub async fn file_versions(&self, file_id: &InstanceFileId) -> WorkflowResult<Vec<InstanceFile>> {
        let versions = self.store.list_instance_file_versions(file_id).await?;
        if versions.is_empty() {
            return Err(WorkflowError::FileNotFound(file_id.clone()));
        }
        Ok(versions)
    }

    /// Current versions of the files a task may read
    pub async fn available_files_for_task(
        &self,
        task_id: &InstanceTaskId,
    ) -> WorkflowResult<Vec<InstanceFile>> {
        let snapshot = self.snapshot_for_task(task_id).await?;
        self.dependencies.available_files(&snapshot, task_id)
    }

    // ── Consolidation ────────────────────────────────────────────────

    pub async fn preview_consolidation(
        &self,
        task_id: &InstanceTaskId,
    ) -> WorkflowResult<ConsolidationPreview> {
        let snapshot = self.snapshot_for_task(task_id).await?;
        self.consolidation.preview(&snapshot, task_id)
    }

    /// Merge the selected files and complete the task
    pub async fn consolidate(
        &self,
        task_id: &InstanceTaskId,
        selected: &[InstanceFileId],
        notes: Option<String>,
        actor: Identity,
    ) -> WorkflowResult<Consolidation> {
        let (_guard, snapshot) = self.locked_for_task(task_id).await?;
        self.sequencer.ensure_in_progress(&snapshot, task_id)?;
        let selection = self
            .consolidation
            .select_manual(&snapshot, task_id, selected)?;
        self.finish_consolidation(snapshot, task_id, &selection, notes, actor)
            .await
    }

    /// Merge the files the policy selects and complete the task
    pub async fn auto_consolidate(
        &self,
        task_id: &InstanceTaskId,
        actor: Identity,
    ) -> WorkflowResult<Consolidation> {
        let (_guard, snapshot) = self.locked_for_task(task_id).await?;
        self.sequencer.ensure_in_progress(&snapshot, task_id)?;
        let selection = self.consolidation.select_auto(&snapshot, task_id)?;
        self.finish_consolidation(snapshot, task_id, &selection, None, actor)
            .await
    }

    async fn finish_consolidation(
        &self,
        mut snapshot: InstanceSnapshot,
        task_id: &InstanceTaskId,
        selection: &[InstanceFile],
        notes: Option<String>,
        actor: Identity,
    ) -> WorkflowResult<Consolidation> {
        let now = Utc::now();
        let file = self
            .consolidation
            .build_artifact(&snapshot, task_id, selection, notes, &actor, now)?;
        snapshot.add_file(file.clone())?;
        let advance = self.sequencer.complete(&mut snapshot, task_id, now)?;
        let transition = Self::transition(&snapshot, task_id, &advance, &[], None)?;
        self.persist(snapshot).await?;

        tracing::info!(
            task_id = %task_id,
            file_id = %file.instance_file_id,
            inputs = selection.len(),
            "Files consolidated"
        );
        Ok(Consolidation { file, transition })
    }

    // ── Decisions and Revision ───────────────────────────────────────

    pub async fn routing_options(
        &self,
        task_id: &InstanceTaskId,
    ) -> WorkflowResult<Vec<RoutingOption>> {
        let snapshot = self.snapshot_for_task(task_id).await?;
        self.router.routing_options(&snapshot, task_id)
    }

    pub async fn can_be_revised(&self, task_id: &InstanceTaskId) -> WorkflowResult<bool> {
        let snapshot = self.snapshot_for_task(task_id).await?;
        self.router.can_be_revised(&snapshot, task_id)
    }

    pub async fn revision_history(
        &self,
        instance_id: &WorkflowInstanceId,
    ) -> WorkflowResult<RevisionHistory> {
        let snapshot = InstanceSnapshot::load(self.store.as_ref(), instance_id).await?;
        let tasks = snapshot
            .tasks()
            .iter()
            .map(|task| {
                Ok(TaskRevisions {
                    task_id: task.id.clone(),
                    task_definition_id: task.task_definition_id.clone(),
                    revisit_count: task.revisit_count,
                    can_be_revised: self.router.can_be_revised(&snapshot, &task.id)?,
                })
            })
            .collect::<WorkflowResult<Vec<_>>>()?;
        Ok(RevisionHistory {
            instance_id: instance_id.clone(),
            decisions: snapshot.decisions().to_vec(),
            tasks,
        })
    }

    // ── Escalation and Attention ─────────────────────────────────────

    /// Reassign a task to `target`. Escalating again to the same target
    /// changes nothing.
    pub async fn escalate_task(
        &self,
        task_id: &InstanceTaskId,
        target: Identity,
    ) -> WorkflowResult<InstanceTask> {
        let (task, _) = self.escalate_task_at(task_id, &target, Utc::now()).await?;
        Ok(task)
    }

    async fn escalate_task_at(
        &self,
        task_id: &InstanceTaskId,
        target: &Identity,
        now: DateTime<Utc>,
    ) -> WorkflowResult<(InstanceTask, bool)> {
        let (_guard, mut snapshot) = self.locked_for_task(task_id).await?;
        let changed = self
            .monitor
            .escalate_task(&mut snapshot, task_id, target, now)?;
        let task = snapshot.task(task_id)?.clone();
        self.persist(snapshot).await?;
        Ok((task, changed))
    }

    /// Mark an instance escalated to `target`
    pub async fn escalate_instance(
        &self,
        instance_id: &WorkflowInstanceId,
        target: Identity,
    ) -> WorkflowResult<WorkflowInstance> {
        let (instance, _) = self
            .escalate_instance_at(instance_id, &target, Utc::now())
            .await?;
        Ok(instance)
    }

    async fn escalate_instance_at(
        &self,
        instance_id: &WorkflowInstanceId,
        target: &Identity,
        now: DateTime<Utc>,
    ) -> WorkflowResult<(WorkflowInstance, bool)> {
        let (_guard, mut snapshot) = self.locked(instance_id).await?;
        let changed = self.monitor.escalate_instance(&mut snapshot, target, now)?;
        let instance = snapshot.instance().clone();
        self.persist(snapshot).await?;
        Ok((instance, changed))
    }

    pub async fn overdue_tasks(&self, now: DateTime<Utc>) -> WorkflowResult<Vec<AttentionItem>> {
        let mut items = Vec::new();
        for snapshot in self.open_snapshots().await? {
            items.extend(self.monitor.overdue_tasks(&snapshot, now));
        }
        Ok(items)
    }

    pub async fn overdue_instances(&self, now: DateTime<Utc>) -> WorkflowResult<Vec<AttentionItem>> {
        let mut items = Vec::new();
        for snapshot in self.open_snapshots().await? {
            items.extend(self.monitor.overdue_instance(&snapshot, now));
        }
        Ok(items)
    }

    /// Tasks and instances inside their reminder window
    pub async fn needing_reminder(&self, now: DateTime<Utc>) -> WorkflowResult<Vec<AttentionItem>> {
        let mut items = Vec::new();
        for snapshot in self.open_snapshots().await? {
            items.extend(self.monitor.needing_reminder(&snapshot, now));
        }
        Ok(items)
    }

    /// Overdue tasks followed by tasks due for a reminder
    pub async fn tasks_needing_attention(
        &self,
        now: DateTime<Utc>,
    ) -> WorkflowResult<Vec<AttentionItem>> {
        let mut items = Vec::new();
        for snapshot in self.open_snapshots().await? {
            items.extend(self.monitor.overdue_tasks(&snapshot, now));
            items.extend(
                self.monitor
                    .needing_reminder(&snapshot, now)
                    .into_iter()
                    .filter(|item| item.task_id().is_some()),
            );
        }
        Ok(items)
    }

    /// Escalate every overdue item that is not escalated yet and collect
    /// reminders. Safe to run concurrently with itself.
    pub async fn run_attention_sweep(&self, now: DateTime<Utc>) -> WorkflowResult<SweepReport> {
        let mut report = SweepReport::default();

        for snapshot in self.open_snapshots().await? {
            let starter = snapshot.instance().started_by.clone();

            for item in self.monitor.overdue_tasks(&snapshot, now) {
                let Some(task_id) = item.task_id() else {
                    continue;
                };
                if item.already_escalated {
                    continue;
                }
                let owner = item.assignee.clone().unwrap_or_else(|| starter.clone());
                let Some(target) = self.directory.resolve_escalation_target(&owner).await? else {
                    tracing::warn!(task_id = %task_id, owner = %owner, "No escalation target");
                    report.skipped += 1;
                    continue;
                };
                match self.escalate_task_at(task_id, &target, now).await {
                    Ok((_, true)) => report.escalated_tasks.push(task_id.clone()),
                    Ok((_, false)) => report.skipped += 1,
                    Err(WorkflowError::InvalidTransition { actual, .. }) => {
                        tracing::warn!(task_id = %task_id, actual = %actual, "Task moved on before escalation");
                        report.skipped += 1;
                    }
                    Err(err) => return Err(err),
                }
            }

            if let Some(item) = self.monitor.overdue_instance(&snapshot, now) {
                if !item.already_escalated {
                    match self.directory.resolve_escalation_target(&starter).await? {
                        Some(target) => {
                            match self
                                .escalate_instance_at(&item.instance_id, &target, now)
                                .await
                            {
                                Ok((_, true)) => {
                                    report.escalated_instances.push(item.instance_id.clone())
                                }
                                Ok((_, false)) => report.skipped += 1,
                                Err(WorkflowError::InvalidTransition { actual, .. }) => {
                                    tracing::warn!(
                                        instance_id = %item.instance_id,
                                        actual = %actual,
                                        "Instance finished before escalation"
                                    );
                                    report.skipped += 1;
                                }
                                Err(err) => return Err(err),
                            }
                        }
                        None => {
                            tracing::warn!(
                                instance_id = %item.instance_id,
                                starter = %starter,
                                "No escalation target"
                            );
                            report.skipped += 1;
                        }
                    }
                }
            }

            for item in self.monitor.needing_reminder(&snapshot, now) {
                tracing::info!(
                    instance_id = %item.instance_id,
                    task_id = ?item.task_id(),
                    assignee = ?item.assignee,
                    due_at = ?item.due_at,
                    "Reminder due"
                );
                report.reminders.push(item);
            }
        }

        self.locks.prune();
        tracing::info!(
            escalated_tasks = report.escalated_tasks.len(),
            escalated_instances = report.escalated_instances.len(),
            reminders = report.reminders.len(),
            skipped = report.skipped,
            "Attention sweep finished"
        );
        Ok(report)
    }

    // ── Internals ────────────────────────────────────────────────────

    async fn instance_of(&self, task_id: &InstanceTaskId) -> WorkflowResult<WorkflowInstanceId> {
        Ok(self.get_instance_task(task_id).await?.instance_id)
    }

    async fn locked(
        &self,
        instance_id: &WorkflowInstanceId,
    ) -> WorkflowResult<(InstanceGuard, InstanceSnapshot)> {
        let guard = self.locks.acquire(instance_id).await;
        let snapshot = InstanceSnapshot::load(self.store.as_ref(), instance_id).await?;
        Ok((guard, snapshot))
    }

    async fn locked_for_task(
        &self,
        task_id: &InstanceTaskId,
    ) -> WorkflowResult<(InstanceGuard, InstanceSnapshot)> {
        let instance_id = self.instance_of(task_id).await?;
        self.locked(&instance_id).await
    }

    async fn snapshot_for_task(&self, task_id: &InstanceTaskId) -> WorkflowResult<InstanceSnapshot> {
        let instance_id = self.instance_of(task_id).await?;
        InstanceSnapshot::load(self.store.as_ref(), &instance_id).await
    }

    async fn open_snapshots(&self) -> WorkflowResult<Vec<InstanceSnapshot>> {
        let mut snapshots = Vec::new();
        for instance in self.store.list_instances().await? {
            if instance.is_terminal() {
                continue;
            }
            snapshots.push(InstanceSnapshot::load(self.store.as_ref(), &instance.id).await?);
        }
        Ok(snapshots)
    }

    async fn persist(&self, snapshot: InstanceSnapshot) -> WorkflowResult<()> {
        if !snapshot.is_dirty() {
            return Ok(());
        }
        self.store.commit(snapshot.into_change_set()).await?;
        Ok(())
    }

    fn view(snapshot: &InstanceSnapshot) -> InstanceView {
        InstanceView {
            instance: snapshot.instance().clone(),
            tasks: snapshot.tasks().to_vec(),
        }
    }

    fn transition(
        snapshot: &InstanceSnapshot,
        task_id: &InstanceTaskId,
        advance: &Advance,
        reopened: &[InstanceTaskId],
        decision: Option<InstanceDecisionOutcome>,
    ) -> WorkflowResult<TaskTransition> {
        let collect = |ids: &[InstanceTaskId]| {
            ids.iter()
                .map(|id| snapshot.task(id).cloned())
                .collect::<WorkflowResult<Vec<_>>>()
        };
        Ok(TaskTransition {
            task: snapshot.task(task_id)?.clone(),
            instance: snapshot.instance().clone(),
            activated: collect(&advance.activated)?,
            reopened: collect(reopened)?,
            decision,
            instance_completed: advance.instance_completed,
        })
    }
}
