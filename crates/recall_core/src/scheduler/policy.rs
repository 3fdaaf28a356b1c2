//! Growth policy and event-log replay.

use crate::config::SchedulerConfig;
use crate::model::task::ReviewEvent;

/// Output of one scheduling step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextSchedule {
    pub interval_ms: i64,
    pub next_due_at: i64,
}

/// Computes the schedule that follows a review at `reviewed_at`.
///
/// `review_count` is the number of reviews recorded *before* this one. The
/// first review always resets to the initial interval so a fresh task is
/// deterministic regardless of what interval it was stored with.
pub fn next_schedule(
    config: &SchedulerConfig,
    current_interval_ms: i64,
    review_count: u32,
    reviewed_at: i64,
) -> NextSchedule {
    let interval_ms = if review_count == 0 {
        config.initial_interval_ms
    } else {
        grow(config, current_interval_ms)
    };

    NextSchedule {
        interval_ms,
        next_due_at: reviewed_at.saturating_add(interval_ms),
    }
}

/// Due timestamp assigned to a task created at `created_at`.
pub fn initial_due_at(config: &SchedulerConfig, created_at: i64) -> i64 {
    created_at.saturating_add(config.initial_interval_ms)
}

fn grow(config: &SchedulerConfig, current_interval_ms: i64) -> i64 {
    let ceiling = config.max_interval_ms as f64;
    let grown = (current_interval_ms as f64 * config.growth_factor).min(ceiling);
    // `as` saturates for out-of-range floats; NaN maps to 0 and is floored.
    (grown.round() as i64).clamp(config.initial_interval_ms, config.max_interval_ms)
}

/// Derived task fields reconstructed from a review log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayedState {
    pub review_count: u32,
    pub current_interval_ms: i64,
    pub next_due_at: i64,
    pub last_reviewed_at: Option<i64>,
}

/// Replays review events in order, starting from a freshly created task.
pub fn replay_events(
    config: &SchedulerConfig,
    created_at: i64,
    events: &[ReviewEvent],
) -> ReplayedState {
    let initial = ReplayedState {
        review_count: 0,
        current_interval_ms: config.initial_interval_ms,
        next_due_at: initial_due_at(config, created_at),
        last_reviewed_at: None,
    };

    events.iter().fold(initial, |state, event| {
        let next = next_schedule(
            config,
            state.current_interval_ms,
            state.review_count,
            event.reviewed_at,
        );
        ReplayedState {
            review_count: state.review_count + 1,
            current_interval_ms: next.interval_ms,
            next_due_at: next.next_due_at,
            last_reviewed_at: Some(event.reviewed_at),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::{initial_due_at, next_schedule, replay_events, NextSchedule};
    use crate::config::{SchedulerConfig, MILLIS_PER_DAY};
    use crate::model::task::ReviewEvent;
    use uuid::Uuid;

    const DAY: i64 = MILLIS_PER_DAY;

    #[test]
    fn first_review_uses_initial_interval_regardless_of_stored_value() {
        let config = SchedulerConfig::default();
        let next = next_schedule(&config, 40 * DAY, 0, 5 * DAY);
        assert_eq!(
            next,
            NextSchedule {
                interval_ms: DAY,
                next_due_at: 6 * DAY,
            }
        );
    }

    #[test]
    fn later_reviews_multiply_by_growth_factor() {
        let config = SchedulerConfig::default();
        let next = next_schedule(&config, 3 * DAY, 2, 10 * DAY);
        assert_eq!(next.interval_ms, 6 * DAY);
        assert_eq!(next.next_due_at, 16 * DAY);
    }

    #[test]
    fn interval_is_capped_at_max() {
        let config = SchedulerConfig::default();
        let next = next_schedule(&config, 120 * DAY, 7, 0);
        assert_eq!(next.interval_ms, 180 * DAY);

        let huge = next_schedule(&config, i64::MAX, 7, 0);
        assert_eq!(huge.interval_ms, 180 * DAY);
    }

    #[test]
    fn interval_never_drops_below_initial() {
        let config = SchedulerConfig::default();
        let next = next_schedule(&config, 1, 3, 0);
        assert_eq!(next.interval_ms, DAY);
    }

    #[test]
    fn unit_growth_factor_holds_interval() {
        let config = SchedulerConfig {
            growth_factor: 1.0,
            ..SchedulerConfig::default()
        };
        let next = next_schedule(&config, 4 * DAY, 3, 0);
        assert_eq!(next.interval_ms, 4 * DAY);
    }

    #[test]
    fn replay_matches_stepwise_scheduling() {
        let config = SchedulerConfig::default();
        let task_id = Uuid::new_v4();
        let event = |sequence: u32, reviewed_at: i64| ReviewEvent {
            task_id,
            sequence,
            reviewed_at,
            interval_before_ms: 0,
            interval_after_ms: 0,
        };
        let events = [event(1, DAY), event(2, 2 * DAY), event(3, 4 * DAY)];

        let state = replay_events(&config, 0, &events);
        assert_eq!(state.review_count, 3);
        assert_eq!(state.current_interval_ms, 4 * DAY);
        assert_eq!(state.next_due_at, 8 * DAY);
        assert_eq!(state.last_reviewed_at, Some(4 * DAY));
    }

    #[test]
    fn replay_of_empty_log_is_fresh_task() {
        let config = SchedulerConfig::default();
        let state = replay_events(&config, 7, &[]);
        assert_eq!(state.review_count, 0);
        assert_eq!(state.current_interval_ms, DAY);
        assert_eq!(state.next_due_at, initial_due_at(&config, 7));
        assert_eq!(state.last_reviewed_at, None);
    }
}
