//! Trigger loop: attention sweeps and scheduled starts

use crate::config::{ScheduleConfig, SchedulerConfig};
use chrono::{NaiveDate, Utc};
use docflow_engine::{ScheduledStart, WorkflowEngine};
use docflow_types::{CalendarId, Identity, WorkflowDefinitionId, WorkflowResult};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// What checking one schedule on one date did
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScheduleRun {
    Started {
        definition_id: WorkflowDefinitionId,
    },
    Deferred {
        definition_id: WorkflowDefinitionId,
        next_date: Option<NaiveDate>,
    },
    /// Already checked for this date
    AlreadyChecked,
}

/// Scheduler state
pub struct Scheduler {
    config: SchedulerConfig,
    engine: Arc<WorkflowEngine>,
    schedules: Vec<ScheduleConfig>,
    /// Last date each schedule was checked, by index
    checked: Mutex<HashMap<usize, NaiveDate>>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        engine: Arc<WorkflowEngine>,
        schedules: Vec<ScheduleConfig>,
    ) -> Self {
        Self {
            config,
            engine,
            schedules,
            checked: Mutex::new(HashMap::new()),
        }
    }

    /// Run until `shutdown` resolves
    pub async fn run(self: Arc<Self>, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        let mut sweep = interval(Duration::from_secs(self.config.sweep_interval_secs.max(1)));
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut schedules = interval(Duration::from_secs(
            self.config.schedule_check_interval_secs.max(1),
        ));
        schedules.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            sweep_interval_secs = self.config.sweep_interval_secs,
            schedules = self.schedules.len(),
            "Scheduler started"
        );

        loop {
            tokio::select! {
                _ = sweep.tick() => {
                    if let Err(e) = self.engine.run_attention_sweep(Utc::now()).await {
                        tracing::error!(error = %e, "Attention sweep failed");
                    }
                }
                _ = schedules.tick() => {
                    self.check_schedules(Utc::now().date_naive()).await;
                }
                _ = &mut shutdown => break,
            }
        }

        tracing::info!("Scheduler stopped");
    }

    /// Check every schedule for `today`. Failures are logged per schedule.
    pub async fn check_schedules(&self, today: NaiveDate) -> Vec<ScheduleRun> {
        let mut runs = Vec::with_capacity(self.schedules.len());
        for index in 0..self.schedules.len() {
            match self.check_schedule(index, today).await {
                Ok(run) => runs.push(run),
                Err(e) => {
                    let schedule = &self.schedules[index];
                    tracing::error!(
                        definition_id = %schedule.definition_id,
                        calendar_id = %schedule.calendar_id,
                        error = %e,
                        "Scheduled start failed"
                    );
                }
            }
        }
        runs
    }

    /// Check one schedule, at most once per date
    async fn check_schedule(&self, index: usize, today: NaiveDate) -> WorkflowResult<ScheduleRun> {
        let mut checked = self.checked.lock().await;
        if checked.get(&index) == Some(&today) {
            return Ok(ScheduleRun::AlreadyChecked);
        }

        let schedule = &self.schedules[index];
        let definition_id = WorkflowDefinitionId::new(schedule.definition_id.clone());
        let result = self
            .engine
            .start_scheduled_instance(
                &definition_id,
                &CalendarId::new(schedule.calendar_id.clone()),
                today,
                Identity::new(schedule.starter.clone()),
            )
            .await?;
        checked.insert(index, today);

        Ok(match result {
            ScheduledStart::Started(view) => {
                tracing::info!(
                    definition_id = %definition_id,
                    instance_id = %view.instance.id,
                    date = %today,
                    "Scheduled instance started"
                );
                ScheduleRun::Started { definition_id }
            }
            ScheduledStart::Deferred { next_date } => ScheduleRun::Deferred {
                definition_id,
                next_date,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docflow_engine::{CalendarRules, InMemoryStore, StaticDirectory, WeekdayCalendar};
    use docflow_types::{RoleId, TaskDefinition, WorkflowDefinition};

    async fn scheduler() -> Arc<Scheduler> {
        let engine = Arc::new(WorkflowEngine::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(StaticDirectory::new()),
            Arc::new(
                WeekdayCalendar::new().with_calendar("business", CalendarRules::business_days()),
            ),
        ));

        let mut definition = WorkflowDefinition::with_id(WorkflowDefinitionId::new("report"), "Report");
        definition
            .add_task(TaskDefinition::upload("draft", 1, RoleId::new("author")))
            .unwrap();
        definition.active = true;
        engine.register_definition(definition).await.unwrap();

        let schedules = vec![
            ScheduleConfig {
                definition_id: "report".into(),
                calendar_id: "business".into(),
                starter: "docflowd".into(),
            },
            ScheduleConfig {
                definition_id: "report".into(),
                calendar_id: "missing".into(),
                starter: "docflowd".into(),
            },
        ];
        Arc::new(Scheduler::new(SchedulerConfig::default(), engine, schedules))
    }

    #[tokio::test]
    async fn test_schedule_starts_once_per_date() {
        let scheduler = scheduler().await;
        let wednesday = NaiveDate::from_ymd_opt(2026, 10, 14).unwrap();

        let runs = scheduler.check_schedules(wednesday).await;
        // The unknown calendar fails and is only logged
        assert_eq!(
            runs,
            vec![ScheduleRun::Started {
                definition_id: WorkflowDefinitionId::new("report")
            }]
        );

        let again = scheduler.check_schedules(wednesday).await;
        assert_eq!(again[0], ScheduleRun::AlreadyChecked);
        assert_eq!(scheduler.engine.list_instances().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_weekend_is_deferred() {
        let scheduler = scheduler().await;
        let saturday = NaiveDate::from_ymd_opt(2026, 10, 17).unwrap();

        let runs = scheduler.check_schedules(saturday).await;
        assert_eq!(
            runs[0],
            ScheduleRun::Deferred {
                definition_id: WorkflowDefinitionId::new("report"),
                next_date: NaiveDate::from_ymd_opt(2026, 10, 19),
            }
        );
        assert!(scheduler.engine.list_instances().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let scheduler = scheduler().await;
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(scheduler.clone().run(async move {
            let _ = rx.await;
        }));
        tx.send(()).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
