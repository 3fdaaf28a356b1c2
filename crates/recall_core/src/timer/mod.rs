//! Background notification timer.
//!
//! # Responsibility
//! - Sleep until the next due timestamp or an explicit wake signal.
//! - Emit one reminder per due task, in ascending due order.
//! - Periodically reconcile the due index against the task store.
//!
//! # Invariants
//! - Firing never mutates `next_due_at`; due state lives in the store.
//! - A still-due task is not re-emitted inside the de-duplication window.
//! - No lock is held while the timer thread sleeps or delivers.
//! - Index writes derived from store reads happen under the write gate
//!   shared with the review service.

pub mod notification_timer;
