//! Notification delivery boundary.
//!
//! # Responsibility
//! - Define the contract the timer uses to hand due reminders to a renderer.
//! - Provide in-process sinks for logging and UI polling.
//!
//! # Invariants
//! - Delivery failures never propagate into scheduling state.

pub mod sink;
