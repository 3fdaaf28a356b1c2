//! In-memory due-order index over the task store.
//!
//! # Responsibility
//! - Answer "what is due next" and "what is due now" without store scans.
//! - Rebuild itself from the store and detect drift against it.
//!
//! # Invariants
//! - Entries are ordered by `(due_at, task_id)`.
//! - The index is a derived view; the task store stays the source of truth.

pub mod due_index;
pub mod write_gate;
