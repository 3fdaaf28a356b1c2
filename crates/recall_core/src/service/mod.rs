//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate store, index and timer calls into use-case level APIs.
//! - Keep presentation layers decoupled from scheduling state.

pub mod review_service;
