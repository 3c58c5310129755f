//! Docflow execution engine
//!
//! The engine turns a static workflow definition into live instances and
//! drives them: it decides what may run next, which files a task may see,
//! how files are consolidated, where a decision routes, and what has been
//! waiting too long.
//!
//! # Architecture
//!
//! The [`WorkflowEngine`] composes specialized components:
//!
//! - [`DependencyResolver`]: file visibility across source tasks
//! - [`ConsolidationResolver`]: selection and merging of files
//! - [`TaskSequencer`]: task lifecycle and stage advancement
//! - [`DecisionRouter`]: outcome routing, selective and cascade revision
//! - [`AttentionMonitor`]: overdue detection, reminders, escalation
//! - [`DefinitionRegistry`]: validated definition storage
//!
//! All state lives behind the [`Store`] collaborator. Mutations of one
//! instance are serialized by [`InstanceLocks`] and written as a single
//! [`ChangeSet`].
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use docflow_engine::{InMemoryStore, StaticDirectory, WeekdayCalendar, WorkflowEngine};
//! use docflow_types::*;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let engine = WorkflowEngine::new(
//!     Arc::new(InMemoryStore::new()),
//!     Arc::new(StaticDirectory::new().with_member("author", "alice")),
//!     Arc::new(WeekdayCalendar::new()),
//! );
//!
//! let mut def = WorkflowDefinition::new("Policy Update");
//! def.add_task(TaskDefinition::upload("draft", 1, RoleId::new("author"))).unwrap();
//! def.active = true;
//! let def_id = engine.register_definition(def).await.unwrap();
//!
//! let view = engine.start_instance(&def_id, Identity::new("alice")).await.unwrap();
//! let draft = view.task("draft").unwrap().id.clone();
//!
//! engine.start_task(&draft).await.unwrap();
//! engine.upload_file(&draft, "policy.docx", Identity::new("alice")).await.unwrap();
//! let done = engine.complete_task(&draft, None).await.unwrap();
//! assert!(done.instance_completed);
//! # }
//! ```

#![deny(unsafe_code)]

pub mod attention_monitor;
pub mod consolidation_resolver;
pub mod decision_router;
pub mod definition_registry;
pub mod dependency_resolver;
mod engine;
pub mod locks;
pub mod memory;
pub mod snapshot;
pub mod store;
pub mod task_sequencer;

#[cfg(test)]
mod test_support;

pub use attention_monitor::{AttentionItem, AttentionKind, AttentionMonitor, AttentionSubject};
pub use consolidation_resolver::{ConsolidationPreview, ConsolidationResolver};
pub use decision_router::{DecisionRouter, Routing, RoutingOption, RoutingTarget};
pub use definition_registry::DefinitionRegistry;
pub use dependency_resolver::DependencyResolver;
pub use engine::{
    Consolidation, InstanceView, RevisionHistory, ScheduledStart, SweepReport, TaskRevisions,
    TaskTransition, WorkflowEngine,
};
pub use locks::{InstanceGuard, InstanceLocks};
pub use memory::{CalendarRules, InMemoryStore, StaticDirectory, WeekdayCalendar};
pub use snapshot::InstanceSnapshot;
pub use store::{CalendarOracle, ChangeSet, CollaboratorResult, Directory, Store};
pub use task_sequencer::{Advance, TaskSequencer};
