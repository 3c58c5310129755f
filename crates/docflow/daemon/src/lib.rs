//! Docflow daemon library
//!
//! Components of the `docflowd` background service:
//! - layered configuration
//! - definition loading from JSON files
//! - the trigger loop for scheduled starts and attention sweeps

#![deny(unsafe_code)]

pub mod config;
pub mod loader;
pub mod scheduler;

pub use config::DaemonConfig;
pub use loader::{load_definitions, register_definitions};
pub use scheduler::{ScheduleRun, Scheduler};
