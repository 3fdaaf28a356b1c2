//! Flutter-facing bindings for the Recall review engine.

pub mod api;
