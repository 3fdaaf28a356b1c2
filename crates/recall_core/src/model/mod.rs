//! Domain model for review tasks and their review history.
//!
//! # Responsibility
//! - Define canonical data structures used by scheduling logic.
//! - Keep user-editable fields apart from scheduler-derived fields.
//!
//! # Invariants
//! - Every task is identified by a stable `TaskId`.
//! - Derived fields are a cache over the append-only review log.

pub mod task;
