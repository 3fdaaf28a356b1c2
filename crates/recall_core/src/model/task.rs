//! Task and review event domain model.
//!
//! # Responsibility
//! - Define the canonical task record and its append-only review events.
//! - Validate user-supplied task fields before persistence.
//!
//! # Invariants
//! - `id` is stable and never reused for another task.
//! - `next_due_at >= last_reviewed_at`, or `>= created_at` before the first review.
//! - `current_interval_ms` is strictly positive.
//! - `review_count` equals the number of recorded review events.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identifier for one review task.
pub type TaskId = Uuid;

/// Upper bound for task names, in characters.
pub const MAX_TASK_NAME_CHARS: usize = 200;

/// Canonical review task record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    /// Trimmed, non-empty display name.
    pub name: String,
    pub description: Option<String>,
    /// Unix epoch milliseconds.
    pub created_at: i64,
    /// Completed reviews. Starts at 0.
    pub review_count: u32,
    /// Gap before the next review, in milliseconds.
    pub current_interval_ms: i64,
    /// Unix epoch milliseconds. Only moved by recording a review.
    pub next_due_at: i64,
    /// Unix epoch milliseconds, `None` until the first review.
    pub last_reviewed_at: Option<i64>,
}

impl Task {
    /// Returns whether the task is due at `now_ms`.
    pub fn is_due(&self, now_ms: i64) -> bool {
        self.next_due_at <= now_ms
    }

    /// Checks scheduling invariants on a loaded or computed record.
    pub fn validate(&self) -> Result<(), TaskValidationError> {
        validate_name(&self.name)?;
        if self.current_interval_ms <= 0 {
            return Err(TaskValidationError::NonPositiveInterval(
                self.current_interval_ms,
            ));
        }
        let floor = self.last_reviewed_at.unwrap_or(self.created_at);
        if self.next_due_at < floor {
            return Err(TaskValidationError::DueBeforeAnchor {
                next_due_at: self.next_due_at,
                anchor: floor,
            });
        }
        if self.review_count == 0 && self.last_reviewed_at.is_some() {
            return Err(TaskValidationError::ReviewCountMismatch);
        }
        Ok(())
    }
}

/// Append-only record of one completed review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewEvent {
    pub task_id: TaskId,
    /// 1-based position of this review in the task history.
    pub sequence: u32,
    /// Unix epoch milliseconds.
    pub reviewed_at: i64,
    pub interval_before_ms: i64,
    pub interval_after_ms: i64,
}

/// Partial update request for a task.
///
/// Only `name` and `description` may be set; the derived scheduling fields
/// exist so that attempts to patch them are rejected explicitly rather than
/// silently ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPatch {
    pub name: Option<String>,
    /// `Some(None)` clears the description.
    pub description: Option<Option<String>>,
    pub review_count: Option<u32>,
    pub current_interval_ms: Option<i64>,
    pub next_due_at: Option<i64>,
}

impl TaskPatch {
    /// Patch that renames a task.
    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Patch that replaces (or clears) a task description.
    pub fn describe(description: Option<String>) -> Self {
        Self {
            description: Some(description),
            ..Self::default()
        }
    }

    /// Returns the first scheduler-owned field this patch tries to change.
    pub fn derived_field(&self) -> Option<&'static str> {
        if self.review_count.is_some() {
            Some("review_count")
        } else if self.current_interval_ms.is_some() {
            Some("current_interval")
        } else if self.next_due_at.is_some() {
            Some("next_due_at")
        } else {
            None
        }
    }
}

/// Validation failures for task fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskValidationError {
    EmptyName,
    NameTooLong { chars: usize, max: usize },
    NonPositiveInterval(i64),
    DueBeforeAnchor { next_due_at: i64, anchor: i64 },
    ReviewCountMismatch,
}

impl Display for TaskValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyName => write!(f, "task name cannot be empty"),
            Self::NameTooLong { chars, max } => {
                write!(f, "task name has {chars} characters; maximum is {max}")
            }
            Self::NonPositiveInterval(value) => {
                write!(f, "task interval must be positive, got {value} ms")
            }
            Self::DueBeforeAnchor {
                next_due_at,
                anchor,
            } => write!(
                f,
                "next_due_at {next_due_at} is earlier than its anchor timestamp {anchor}"
            ),
            Self::ReviewCountMismatch => {
                write!(f, "task has a last review timestamp but zero reviews")
            }
        }
    }
}

impl Error for TaskValidationError {}

/// Trims and validates a task name, returning the stored form.
pub fn normalize_name(name: &str) -> Result<String, TaskValidationError> {
    let trimmed = name.trim();
    validate_name(trimmed)?;
    Ok(trimmed.to_string())
}

/// Trims a description; blank input is stored as `None`.
pub fn normalize_description(description: Option<&str>) -> Option<String> {
    description
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn validate_name(name: &str) -> Result<(), TaskValidationError> {
    if name.trim().is_empty() {
        return Err(TaskValidationError::EmptyName);
    }
    let chars = name.chars().count();
    if chars > MAX_TASK_NAME_CHARS {
        return Err(TaskValidationError::NameTooLong {
            chars,
            max: MAX_TASK_NAME_CHARS,
        });
    }
    Ok(())
}
