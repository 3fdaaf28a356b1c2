//! Review interval policy.
//!
//! # Responsibility
//! - Compute the next interval and due timestamp after a review.
//! - Replay a review log into the derived task fields.
//!
//! # Invariants
//! - Every function here is pure: identical inputs give identical outputs.
//! - Computed intervals stay within `[initial_interval, max_interval]`.

pub mod policy;
