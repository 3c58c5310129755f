//! Configuration for docflowd

use chrono::{NaiveDate, Weekday};
use docflow_engine::{CalendarRules, StaticDirectory, WeekdayCalendar};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Trigger loop configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Where workflow definition files live
    #[serde(default)]
    pub definitions: DefinitionsConfig,

    /// Role membership and escalation chains
    #[serde(default)]
    pub directory: DirectoryConfig,

    /// Run-date calendars by id
    #[serde(default)]
    pub calendars: HashMap<String, CalendarConfig>,

    /// Definitions started automatically on their calendar's run dates
    #[serde(default)]
    pub schedules: Vec<ScheduleConfig>,
}

/// Trigger loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Attention sweep interval in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// How often schedules are checked, in seconds
    #[serde(default = "default_schedule_interval")]
    pub schedule_check_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
            schedule_check_interval_secs: default_schedule_interval(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Definition loading
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefinitionsConfig {
    /// Directory of `*.json` workflow definitions
    #[serde(default)]
    pub path: Option<String>,
}

/// Static directory contents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Role → member identity
    #[serde(default)]
    pub members: HashMap<String, String>,

    /// Identity → escalation target
    #[serde(default)]
    pub escalations: HashMap<String, String>,

    /// Escalation target for identities without an entry
    #[serde(default)]
    pub fallback: Option<String>,
}

impl DirectoryConfig {
    pub fn build(&self) -> StaticDirectory {
        let mut directory = StaticDirectory::new();
        for (role, identity) in &self.members {
            directory = directory.with_member(role.clone(), identity.clone());
        }
        for (from, to) in &self.escalations {
            directory = directory.with_escalation(from.clone(), to.clone());
        }
        if let Some(fallback) = &self.fallback {
            directory = directory.with_fallback(fallback.clone());
        }
        directory
    }
}

/// One run-date calendar
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarConfig {
    /// Allowed weekdays, e.g. `["mon", "tue"]`
    #[serde(default = "default_weekdays")]
    pub weekdays: Vec<String>,

    /// Dates excluded regardless of weekday
    #[serde(default)]
    pub excluded: Vec<NaiveDate>,
}

impl CalendarConfig {
    pub fn rules(&self) -> Result<CalendarRules, String> {
        let weekdays: HashSet<Weekday> = self
            .weekdays
            .iter()
            .map(|day| {
                day.parse::<Weekday>()
                    .map_err(|_| format!("Invalid weekday: {}", day))
            })
            .collect::<Result<_, String>>()?;
        Ok(CalendarRules {
            weekdays,
            excluded: self.excluded.iter().copied().collect(),
        })
    }
}

/// A definition started on every run date of a calendar
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub definition_id: String,
    pub calendar_id: String,
    /// Identity recorded as the starter
    #[serde(default = "default_starter")]
    pub starter: String,
}

// Default value helpers
fn default_sweep_interval() -> u64 {
    60
}

fn default_schedule_interval() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_weekdays() -> Vec<String> {
    ["mon", "tue", "wed", "thu", "fri"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_starter() -> String {
    "docflowd".to_string()
}

impl DaemonConfig {
    /// Load configuration from file
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        // Add default configuration
        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        // Add file configuration if provided
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        // Add environment variables with DOCFLOW_ prefix, e.g.
        // DOCFLOW_SCHEDULER__SWEEP_INTERVAL_SECS
        builder = builder.add_source(
            config::Environment::with_prefix("DOCFLOW")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// Calendar oracle for all configured calendars
    pub fn calendar(&self) -> Result<WeekdayCalendar, String> {
        let mut calendar = WeekdayCalendar::new();
        for (id, entry) in &self.calendars {
            calendar = calendar.with_calendar(id.clone(), entry.rules()?);
        }
        Ok(calendar)
    }
}
