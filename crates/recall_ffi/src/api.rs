//! FFI use-case API for Flutter-facing calls.
//!
//! # Responsibility
//! - Expose the presentation boundary (create/list/review/delete) to Dart
//!   via FRB.
//! - Own the process-wide review engine between `init_engine` and
//!   `shutdown_engine`.
//! - Buffer due reminders until the UI drains them.
//!
//! # Invariants
//! - Exported functions must not panic across FFI boundary.
//! - Every call returns an envelope; failures carry a stable `error_code`.
//! - At most one engine is open per process.

use recall_core::{
    core_version as core_version_inner, init_logging as init_logging_inner, DueNotice,
    EngineConfig, QueueSink, RepoError, ReviewEngine, ReviewService, TaskId, TaskSummary,
};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

const NOTICE_QUEUE_CAPACITY: usize = 256;

static ENGINE: Mutex<Option<OpenEngine>> = Mutex::new(None);

struct OpenEngine {
    db_path: PathBuf,
    engine: ReviewEngine,
    notices: Arc<QueueSink>,
}

/// Expose core crate version through FFI.
///
/// # FFI contract
/// - Sync call, non-blocking.
/// - Never throws; always returns a UTF-8 string.
#[flutter_rust_bridge::frb(sync)]
pub fn core_version() -> String {
    core_version_inner().to_owned()
}

/// Initializes Rust core logging once per process.
///
/// Input semantics:
/// - `level`: one of `trace|debug|info|warn|error` (case-insensitive).
/// - `log_dir`: absolute directory path where rolling logs are written.
///
/// # FFI contract
/// - Safe to call repeatedly with the same `level + log_dir` (idempotent).
/// - Reconfiguration attempts with different level or directory return error.
/// - Never panics; returns empty string on success and error message on failure.
#[flutter_rust_bridge::frb(sync)]
pub fn init_logging(level: String, log_dir: String) -> String {
    match init_logging_inner(level.as_str(), log_dir.as_str()) {
        Ok(()) => String::new(),
        Err(err) => err,
    }
}

/// Task row shape exposed to the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskItem {
    /// Stable task ID in string form.
    pub task_id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at_ms: i64,
    /// "Near repetition" column.
    pub next_due_at_ms: i64,
    /// "Repeated" column.
    pub review_count: u32,
    pub last_reviewed_at_ms: Option<i64>,
    pub is_due: bool,
}

/// Due reminder waiting to be rendered by the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueNoticeItem {
    pub task_id: String,
    pub task_name: String,
    pub due_at_ms: i64,
}

/// Generic action response envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskActionResponse {
    /// Whether operation succeeded.
    pub ok: bool,
    /// Affected task ID, when known.
    pub task_id: Option<String>,
    /// Task state after the operation (create/review).
    pub task: Option<TaskItem>,
    /// Stable failure category (`invalid_input|not_found|invalid_operation|storage|engine`).
    pub error_code: Option<String>,
    /// Human-readable response message for diagnostics/UI.
    pub message: String,
}

impl TaskActionResponse {
    fn success(message: impl Into<String>, task_id: TaskId, task: Option<TaskItem>) -> Self {
        Self {
            ok: true,
            task_id: Some(task_id.to_string()),
            task,
            error_code: None,
            message: message.into(),
        }
    }

    fn failure(failure: ApiFailure) -> Self {
        Self {
            ok: false,
            task_id: None,
            task: None,
            error_code: Some(failure.code.to_string()),
            message: failure.message,
        }
    }
}

/// Listing response envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskListResponse {
    pub ok: bool,
    /// Tasks ordered by next due time, then ID.
    pub items: Vec<TaskItem>,
    pub error_code: Option<String>,
    pub message: String,
}

/// Opens the task database at `db_path` and starts the reminder timer.
///
/// # FFI contract
/// - Sync call; opens/migrates the database file.
/// - Idempotent for the same path; a different path while open is an error.
/// - Never panics.
#[flutter_rust_bridge::frb(sync)]
pub fn init_engine(db_path: String) -> TaskActionResponse {
    let trimmed = db_path.trim();
    if trimmed.is_empty() {
        return action_failure(
            "init_engine",
            ApiFailure::new("invalid_input", "db_path cannot be empty"),
        );
    }
    let path = PathBuf::from(trimmed);

    let mut slot = match ENGINE.lock() {
        Ok(slot) => slot,
        Err(_) => return action_failure("init_engine", ApiFailure::engine("engine lock poisoned")),
    };
    if let Some(open) = slot.as_ref() {
        if open.db_path == path {
            return engine_ready();
        }
        return action_failure(
            "init_engine",
            ApiFailure::new(
                "invalid_operation",
                format!("engine already open at `{}`", open.db_path.display()),
            ),
        );
    }

    let notices = Arc::new(QueueSink::new(NOTICE_QUEUE_CAPACITY));
    match ReviewEngine::open(&path, EngineConfig::default(), notices.clone()) {
        Ok(engine) => {
            *slot = Some(OpenEngine {
                db_path: path,
                engine,
                notices,
            });
            engine_ready()
        }
        Err(err) => action_failure("init_engine", ApiFailure::engine(err.to_string())),
    }
}

/// Stops the timer, flushes and closes the database.
///
/// # FFI contract
/// - Sync call; waits for an in-flight reminder pass to finish.
/// - Calling without an open engine succeeds (no-op).
#[flutter_rust_bridge::frb(sync)]
pub fn shutdown_engine() -> TaskActionResponse {
    let taken = match ENGINE.lock() {
        Ok(mut slot) => slot.take(),
        Err(_) => {
            return action_failure("shutdown_engine", ApiFailure::engine("engine lock poisoned"))
        }
    };
    let Some(open) = taken else {
        return TaskActionResponse {
            ok: true,
            task_id: None,
            task: None,
            error_code: None,
            message: "Engine not running.".to_string(),
        };
    };
    match open.engine.shutdown() {
        Ok(()) => TaskActionResponse {
            ok: true,
            task_id: None,
            task: None,
            error_code: None,
            message: "Engine stopped.".to_string(),
        },
        Err(err) => action_failure("shutdown_engine", ApiFailure::engine(err.to_string())),
    }
}

/// Creates a review task.
///
/// # FFI contract
/// - Sync call, DB-backed execution.
/// - Blank `name` fails with `invalid_input`.
#[flutter_rust_bridge::frb(sync)]
pub fn create_task(name: String, description: Option<String>) -> TaskActionResponse {
    let result = with_service(|service| {
        service
            .create_task(&name, description.as_deref())
            .map(|task| service.summarize(task))
            .map_err(ApiFailure::from)
    });
    match result {
        Ok(summary) => {
            TaskActionResponse::success("Task created.", summary.id, Some(summary_item(summary)))
        }
        Err(failure) => action_failure("create_task", failure),
    }
}

/// Lists all tasks ordered by next due time.
#[flutter_rust_bridge::frb(sync)]
pub fn list_tasks() -> TaskListResponse {
    match with_service(|service| service.list_tasks().map_err(ApiFailure::from)) {
        Ok(summaries) => {
            let items: Vec<TaskItem> = summaries.into_iter().map(summary_item).collect();
            TaskListResponse {
                ok: true,
                message: format!("{} task(s).", items.len()),
                items,
                error_code: None,
            }
        }
        Err(failure) => TaskListResponse {
            ok: false,
            items: Vec::new(),
            error_code: Some(failure.code.to_string()),
            message: format!("list_tasks failed: {}", failure.message),
        },
    }
}

/// Records "I reviewed this task now" and reschedules it.
///
/// # FFI contract
/// - Sync call, DB-backed execution.
/// - Unknown or malformed `task_id` fails without side effects.
#[flutter_rust_bridge::frb(sync)]
pub fn submit_review(task_id: String) -> TaskActionResponse {
    let result = parse_task_id(&task_id).and_then(|id| {
        with_service(|service| {
            service
                .submit_review(id, None)
                .map(|task| service.summarize(task))
                .map_err(ApiFailure::from)
        })
    });
    match result {
        Ok(summary) => TaskActionResponse::success(
            "Review recorded.",
            summary.id,
            Some(summary_item(summary)),
        ),
        Err(failure) => action_failure("submit_review", failure),
    }
}

/// Deletes a task and its review history.
#[flutter_rust_bridge::frb(sync)]
pub fn delete_task(task_id: String) -> TaskActionResponse {
    let result = parse_task_id(&task_id).and_then(|id| {
        with_service(|service| service.delete_task(id).map_err(ApiFailure::from)).map(|()| id)
    });
    match result {
        Ok(id) => TaskActionResponse::success("Task deleted.", id, None),
        Err(failure) => action_failure("delete_task", failure),
    }
}

/// Returns and clears reminders emitted since the previous call.
///
/// # FFI contract
/// - Sync call, non-blocking.
/// - Returns an empty list when no engine is open.
#[flutter_rust_bridge::frb(sync)]
pub fn drain_due_notices() -> Vec<DueNoticeItem> {
    let notices = match ENGINE.lock() {
        Ok(slot) => slot.as_ref().map(|open| open.notices.clone()),
        Err(_) => None,
    };
    notices
        .map(|queue| queue.drain().into_iter().map(to_notice_item).collect())
        .unwrap_or_default()
}

struct ApiFailure {
    code: &'static str,
    message: String,
}

impl ApiFailure {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn engine(message: impl Into<String>) -> Self {
        Self::new("engine", message)
    }
}

impl From<RepoError> for ApiFailure {
    fn from(err: RepoError) -> Self {
        let code = match &err {
            RepoError::InvalidInput(_) => "invalid_input",
            RepoError::NotFound(_) => "not_found",
            RepoError::InvalidOperation(_) => "invalid_operation",
            RepoError::StorageFailure(_) | RepoError::InvalidData(_) => "storage",
        };
        Self::new(code, err.to_string())
    }
}

fn with_service<T>(
    f: impl FnOnce(&ReviewService) -> Result<T, ApiFailure>,
) -> Result<T, ApiFailure> {
    let slot = ENGINE
        .lock()
        .map_err(|_| ApiFailure::engine("engine lock poisoned"))?;
    let open = slot
        .as_ref()
        .ok_or_else(|| ApiFailure::engine("engine not initialized; call init_engine first"))?;
    f(open.engine.service())
}

fn parse_task_id(raw: &str) -> Result<TaskId, ApiFailure> {
    TaskId::parse_str(raw.trim())
        .map_err(|err| ApiFailure::new("invalid_input", format!("invalid task id `{raw}`: {err}")))
}

fn action_failure(operation: &str, failure: ApiFailure) -> TaskActionResponse {
    log::warn!(
        "event=ffi_call module=ffi status=error op={} code={}",
        operation,
        failure.code
    );
    TaskActionResponse::failure(ApiFailure {
        code: failure.code,
        message: format!("{operation} failed: {}", failure.message),
    })
}

fn engine_ready() -> TaskActionResponse {
    TaskActionResponse {
        ok: true,
        task_id: None,
        task: None,
        error_code: None,
        message: "Engine ready.".to_string(),
    }
}

fn summary_item(summary: TaskSummary) -> TaskItem {
    TaskItem {
        task_id: summary.id.to_string(),
        name: summary.name,
        description: summary.description,
        created_at_ms: summary.created_at,
        next_due_at_ms: summary.next_due_at,
        review_count: summary.review_count,
        last_reviewed_at_ms: summary.last_reviewed_at,
        is_due: summary.is_due,
    }
}

fn to_notice_item(notice: DueNotice) -> DueNoticeItem {
    DueNoticeItem {
        task_id: notice.task_id.to_string(),
        task_name: notice.task_name,
        due_at_ms: notice.due_at,
    }
}
