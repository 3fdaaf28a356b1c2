//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define the task store contract used by services and the timer.
//! - Isolate SQLite query details from scheduling orchestration.
//!
//! # Invariants
//! - Repository writes validate input before any SQL mutation.
//! - Repository APIs return semantic errors (`NotFound`, `InvalidInput`,
//!   `InvalidOperation`) in addition to storage failures.

pub mod task_repo;
