//! Core scheduling engine for Recall, a spaced-repetition review tracker.
//! This crate is the single source of truth for review scheduling invariants.

pub mod clock;
pub mod config;
pub mod db;
pub mod engine;
pub mod index;
pub mod logging;
pub mod model;
pub mod notify;
pub mod repo;
pub mod scheduler;
pub mod service;
pub mod timer;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, EngineConfig, SchedulerConfig, TimerConfig, MILLIS_PER_DAY};
pub use engine::{EngineError, EngineResult, ReviewEngine};
pub use index::due_index::{DueEntry, DueIndex, DueSnapshot, IndexError, ReconcileOutcome};
pub use logging::{
    default_log_level, init_logging, init_stderr_logging, logging_status, LogTarget,
};
pub use model::task::{ReviewEvent, Task, TaskId, TaskPatch, TaskValidationError};
pub use notify::sink::{DeliveryError, DueNotice, LogSink, NotificationSink, QueueSink};
pub use repo::task_repo::{RepoError, RepoResult, SqliteTaskRepository, TaskRepository};
pub use scheduler::policy::{next_schedule, replay_events, NextSchedule, ReplayedState};
pub use service::review_service::{ReviewService, TaskSummary};
pub use timer::notification_timer::{NotificationTimer, TimerHandle, TimerState, TimerWaker};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
