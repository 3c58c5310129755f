//! Docflow domain types
//!
//! A docflow workflow is an ordered sequence of typed tasks (upload,
//! update, consolidate, decide) that an engine drives one instance at a
//! time. This crate holds the data model only; the engine crate owns the
//! state transitions.
//!
//! # Key Concepts
//!
//! - **WorkflowDefinition**: the reusable template. Immutable once active.
//! - **TaskDefinition**: one step of the template, with its sequence order,
//!   optional parallel group, file dependencies, consolidation policy and
//!   decision outcomes.
//! - **WorkflowInstance / InstanceTask**: one run of a definition and the
//!   per-run materialization of each task.
//! - **InstanceFile**: an immutable file version. The highest version of an
//!   instance-file id is its current content ([`FileArena`]).
//! - **InstanceDecisionOutcome**: the append-only record of a decision.
//!
//! Task relationships are typed collections of [`TaskDefinitionId`]. Legacy
//! delimited strings are accepted at deserialization time only.

#![deny(unsafe_code)]

mod decision;
mod definition;
mod errors;
mod file;
mod ids;
mod instance;
pub mod task_id_list;

pub use decision::*;
pub use definition::*;
pub use errors::*;
pub use file::*;
pub use ids::*;
pub use instance::*;
