//! In-memory collaborators for development and testing

use crate::store::*;
use async_trait::async_trait;
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use docflow_types::{
    CalendarId, CollaboratorError, Identity, InstanceDecisionOutcome, InstanceFile, InstanceFileId,
    InstanceTask, InstanceTaskId, RoleId, WorkflowDefinition, WorkflowDefinitionId,
    WorkflowInstance, WorkflowInstanceId,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

// ── Store ────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct MemoryState {
    definitions: HashMap<WorkflowDefinitionId, WorkflowDefinition>,
    instances: HashMap<WorkflowInstanceId, WorkflowInstance>,
    tasks: HashMap<InstanceTaskId, InstanceTask>,
    files: BTreeMap<(InstanceFileId, u32), InstanceFile>,
    decisions: Vec<InstanceDecisionOutcome>,
}

/// In-memory store. All state sits behind one lock so a commit is atomic.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<MemoryState>>,
    commits: Arc<AtomicU64>,
    reject_commits: Arc<AtomicBool>,
}

impl InMemoryStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of change sets applied so far
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    /// Make every following commit fail as unavailable
    pub fn set_unavailable(&self, unavailable: bool) {
        self.reject_commits.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_definition(
        &self,
        id: &WorkflowDefinitionId,
    ) -> CollaboratorResult<Option<WorkflowDefinition>> {
        let state = self.state.read().await;
        Ok(state.definitions.get(id).cloned())
    }

    async fn save_definition(&self, definition: WorkflowDefinition) -> CollaboratorResult<()> {
        let mut state = self.state.write().await;
        state.definitions.insert(definition.id.clone(), definition);
        Ok(())
    }

    async fn list_definitions(&self) -> CollaboratorResult<Vec<WorkflowDefinition>> {
        let state = self.state.read().await;
        let mut definitions: Vec<_> = state.definitions.values().cloned().collect();
        definitions.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(definitions)
    }

    async fn get_instance(
        &self,
        id: &WorkflowInstanceId,
    ) -> CollaboratorResult<Option<WorkflowInstance>> {
        let state = self.state.read().await;
        Ok(state.instances.get(id).cloned())
    }

    async fn list_instances(&self) -> CollaboratorResult<Vec<WorkflowInstance>> {
        let state = self.state.read().await;
        let mut instances: Vec<_> = state.instances.values().cloned().collect();
        instances.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(instances)
    }

    async fn get_instance_task(
        &self,
        id: &InstanceTaskId,
    ) -> CollaboratorResult<Option<InstanceTask>> {
        let state = self.state.read().await;
        Ok(state.tasks.get(id).cloned())
    }

    async fn list_instance_tasks_by_instance(
        &self,
        instance_id: &WorkflowInstanceId,
    ) -> CollaboratorResult<Vec<InstanceTask>> {
        let state = self.state.read().await;
        let mut tasks: Vec<_> = state
            .tasks
            .values()
            .filter(|t| &t.instance_id == instance_id)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| {
            a.sequence_order
                .cmp(&b.sequence_order)
                .then_with(|| a.task_definition_id.cmp(&b.task_definition_id))
        });
        Ok(tasks)
    }

    async fn list_instance_file_versions(
        &self,
        id: &InstanceFileId,
    ) -> CollaboratorResult<Vec<InstanceFile>> {
        let state = self.state.read().await;
        Ok(state
            .files
            .range((id.clone(), 0)..=(id.clone(), u32::MAX))
            .map(|(_, file)| file.clone())
            .collect())
    }

    async fn list_instance_files_by_task(
        &self,
        task_id: &InstanceTaskId,
    ) -> CollaboratorResult<Vec<InstanceFile>> {
        let state = self.state.read().await;
        Ok(state
            .files
            .values()
            .filter(|f| &f.task_id == task_id)
            .cloned()
            .collect())
    }

    async fn list_instance_files_by_instance(
        &self,
        instance_id: &WorkflowInstanceId,
    ) -> CollaboratorResult<Vec<InstanceFile>> {
        let state = self.state.read().await;
        Ok(state
            .files
            .values()
            .filter(|f| &f.instance_id == instance_id)
            .cloned()
            .collect())
    }

    async fn list_decisions_by_instance(
        &self,
        instance_id: &WorkflowInstanceId,
    ) -> CollaboratorResult<Vec<InstanceDecisionOutcome>> {
        let state = self.state.read().await;
        Ok(state
            .decisions
            .iter()
            .filter(|d| &d.instance_id == instance_id)
            .cloned()
            .collect())
    }

    async fn commit(&self, changes: ChangeSet) -> CollaboratorResult<()> {
        if self.reject_commits.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Unavailable("store rejected commit".into()));
        }

        let mut state = self.state.write().await;

        // Check everything before applying anything
        for file in &changes.files {
            let key = (file.instance_file_id.clone(), file.version);
            if state.files.contains_key(&key) {
                return Err(CollaboratorError::Conflict(format!(
                    "file version {} already exists",
                    file.version_ref()
                )));
            }
        }
        if state
            .decisions
            .iter()
            .any(|d| changes.decisions.iter().any(|n| n.id == d.id))
        {
            return Err(CollaboratorError::Conflict("decision already recorded".into()));
        }

        if let Some(instance) = changes.instance {
            state.instances.insert(instance.id.clone(), instance);
        }
        for task in changes.tasks {
            state.tasks.insert(task.id.clone(), task);
        }
        for file in changes.files {
            state
                .files
                .insert((file.instance_file_id.clone(), file.version), file);
        }
        state.decisions.extend(changes.decisions);

        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ── Directory ────────────────────────────────────────────────────────

/// Directory backed by fixed role and escalation maps
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    members: HashMap<RoleId, Identity>,
    escalations: HashMap<Identity, Identity>,
    fallback: Option<Identity>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_member(mut self, role: impl Into<String>, identity: impl Into<String>) -> Self {
        self.members
            .insert(RoleId::new(role), Identity::new(identity));
        self
    }

    pub fn with_escalation(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.escalations
            .insert(Identity::new(from), Identity::new(to));
        self
    }

    /// Escalation target for identities without an explicit mapping
    pub fn with_fallback(mut self, identity: impl Into<String>) -> Self {
        self.fallback = Some(Identity::new(identity));
        self
    }
}

#[async_trait]
impl Directory for StaticDirectory {
    async fn resolve_assignee(&self, role: &RoleId) -> CollaboratorResult<Option<Identity>> {
        Ok(self.members.get(role).cloned())
    }

    async fn resolve_escalation_target(
        &self,
        identity: &Identity,
    ) -> CollaboratorResult<Option<Identity>> {
        Ok(self
            .escalations
            .get(identity)
            .cloned()
            .or_else(|| self.fallback.clone()))
    }
}

// ── Calendar ─────────────────────────────────────────────────────────

/// Valid run days of one calendar
#[derive(Debug, Clone)]
pub struct CalendarRules {
    pub weekdays: HashSet<Weekday>,
    pub excluded: HashSet<NaiveDate>,
}

impl CalendarRules {
    /// Monday through Friday, no exclusions
    pub fn business_days() -> Self {
        Self {
            weekdays: [
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
            ]
            .into_iter()
            .collect(),
            excluded: HashSet::new(),
        }
    }

    pub fn excluding(mut self, date: NaiveDate) -> Self {
        self.excluded.insert(date);
        self
    }

    pub fn allows(&self, date: NaiveDate) -> bool {
        self.weekdays.contains(&date.weekday()) && !self.excluded.contains(&date)
    }
}

/// How far ahead `next_valid_date` looks before giving up
const CALENDAR_HORIZON_DAYS: i64 = 366;

/// Calendar oracle driven by weekday rules and excluded dates
#[derive(Debug, Clone, Default)]
pub struct WeekdayCalendar {
    calendars: HashMap<CalendarId, CalendarRules>,
}

impl WeekdayCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_calendar(mut self, id: impl Into<String>, rules: CalendarRules) -> Self {
        self.calendars.insert(CalendarId::new(id), rules);
        self
    }

    fn rules(&self, id: &CalendarId) -> CollaboratorResult<&CalendarRules> {
        self.calendars
            .get(id)
            .ok_or_else(|| CollaboratorError::Unavailable(format!("unknown calendar {}", id)))
    }
}

#[async_trait]
impl CalendarOracle for WeekdayCalendar {
    async fn is_valid_run_date(
        &self,
        calendar: &CalendarId,
        date: NaiveDate,
    ) -> CollaboratorResult<bool> {
        Ok(self.rules(calendar)?.allows(date))
    }

    async fn next_valid_date(
        &self,
        calendar: &CalendarId,
        from: NaiveDate,
    ) -> CollaboratorResult<Option<NaiveDate>> {
        let rules = self.rules(calendar)?;
        Ok((1..=CALENDAR_HORIZON_DAYS)
            .map(|offset| from + Duration::days(offset))
            .find(|date| rules.allows(*date)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use docflow_types::{TaskDefinition, TaskStatus};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn make_instance() -> WorkflowInstance {
        WorkflowInstance::new(
            WorkflowDefinitionId::new("wf"),
            1,
            Identity::new("alice"),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_commit_applies_everything() {
        let store = InMemoryStore::new();
        let instance = make_instance();
        let def = TaskDefinition::upload("1", 1, RoleId::new("author"));
        let task = InstanceTask::materialize(&instance.id, &def, None);

        store
            .commit(ChangeSet {
                instance: Some(instance.clone()),
                tasks: vec![task.clone()],
                ..ChangeSet::default()
            })
            .await
            .unwrap();

        assert!(store.get_instance(&instance.id).await.unwrap().is_some());
        let tasks = store
            .list_instance_tasks_by_instance(&instance.id)
            .await
            .unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].status, TaskStatus::Pending);
        assert_eq!(store.commit_count(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_store_writes_nothing() {
        let store = InMemoryStore::new();
        store.set_unavailable(true);
        let instance = make_instance();

        let result = store
            .commit(ChangeSet {
                instance: Some(instance.clone()),
                ..ChangeSet::default()
            })
            .await;

        assert!(matches!(result, Err(CollaboratorError::Unavailable(_))));
        assert!(store.get_instance(&instance.id).await.unwrap().is_none());
        assert_eq!(store.commit_count(), 0);
    }

    #[tokio::test]
    async fn test_static_directory() {
        let directory = StaticDirectory::new()
            .with_member("author", "alice")
            .with_escalation("alice", "manager")
            .with_fallback("admin");

        let assignee = directory
            .resolve_assignee(&RoleId::new("author"))
            .await
            .unwrap();
        assert_eq!(assignee, Some(Identity::new("alice")));
        assert_eq!(
            directory
                .resolve_escalation_target(&Identity::new("alice"))
                .await
                .unwrap(),
            Some(Identity::new("manager"))
        );
        assert_eq!(
            directory
                .resolve_escalation_target(&Identity::new("bob"))
                .await
                .unwrap(),
            Some(Identity::new("admin"))
        );
    }

    #[tokio::test]
    async fn test_weekday_calendar() {
        // 2026-10-16 is a Friday
        let holiday = date(2026, 10, 19);
        let calendar = WeekdayCalendar::new().with_calendar(
            "close",
            CalendarRules::business_days().excluding(holiday),
        );
        let id = CalendarId::new("close");

        assert!(calendar.is_valid_run_date(&id, date(2026, 10, 16)).await.unwrap());
        assert!(!calendar.is_valid_run_date(&id, date(2026, 10, 17)).await.unwrap());
        assert_eq!(
            calendar.next_valid_date(&id, date(2026, 10, 16)).await.unwrap(),
            Some(date(2026, 10, 20))
        );
    }

    #[tokio::test]
    async fn test_unknown_calendar() {
        let calendar = WeekdayCalendar::new();
        let result = calendar
            .is_valid_run_date(&CalendarId::new("nope"), date(2026, 1, 1))
            .await;
        assert!(result.is_err());
    }
}
