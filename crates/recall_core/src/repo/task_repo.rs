//! Task store contract and SQLite implementation.
//!
//! # Responsibility
//! - Own every task and review event record.
//! - Apply review events and their derived task fields as one atomic unit.
//!
//! # Invariants
//! - Derived fields (`review_count`, `current_interval_ms`, `next_due_at`,
//!   `last_reviewed_at`) only change through `record_review` or
//!   `repair_derived_fields`.
//! - Every mutating call has committed before it returns `Ok`.
//! - All mutations are serialized through one connection lock.

use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::db::DbError;
use crate::model::task::{
    normalize_description, normalize_name, ReviewEvent, Task, TaskId, TaskPatch,
    TaskValidationError,
};
use crate::scheduler::policy::{initial_due_at, next_schedule, replay_events};
use log::{error, info, warn};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

const TASK_SELECT_SQL: &str = "SELECT
    id,
    name,
    description,
    created_at,
    review_count,
    current_interval_ms,
    next_due_at,
    last_reviewed_at
FROM tasks";

pub type RepoResult<T> = Result<T, RepoError>;

/// Task store error taxonomy.
#[derive(Debug)]
pub enum RepoError {
    /// Caller input was rejected before anything was written.
    InvalidInput(String),
    NotFound(TaskId),
    /// Attempt to mutate a scheduler-owned field directly.
    InvalidOperation(String),
    /// The durable write (or read) failed; the operation did not happen.
    StorageFailure(DbError),
    /// Persisted rows violate task invariants.
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidInput(message) => write!(f, "invalid input: {message}"),
            Self::NotFound(id) => write!(f, "task not found: {id}"),
            Self::InvalidOperation(message) => write!(f, "invalid operation: {message}"),
            Self::StorageFailure(err) => write!(f, "storage failure: {err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted task data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::StorageFailure(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TaskValidationError> for RepoError {
    fn from(value: TaskValidationError) -> Self {
        Self::InvalidInput(value.to_string())
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::StorageFailure(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::StorageFailure(DbError::Sqlite(value))
    }
}

/// Durable task store contract.
pub trait TaskRepository: Send + Sync {
    fn create_task(&self, name: &str, description: Option<&str>) -> RepoResult<Task>;
    fn get_task(&self, id: TaskId) -> RepoResult<Task>;
    fn update_task(&self, id: TaskId, patch: &TaskPatch) -> RepoResult<Task>;
    fn record_review(&self, id: TaskId, reviewed_at: i64) -> RepoResult<Task>;
    fn delete_task(&self, id: TaskId) -> RepoResult<()>;
    fn list_tasks(&self) -> RepoResult<Vec<Task>>;
    fn list_review_events(&self, id: TaskId) -> RepoResult<Vec<ReviewEvent>>;
    /// Rewrites derived fields by replaying the task's review log.
    fn repair_derived_fields(&self, id: TaskId) -> RepoResult<Task>;
    /// Flushes pending durable state (WAL checkpoint for file stores).
    fn flush(&self) -> RepoResult<()>;
}

/// SQLite-backed task store.
///
/// Owns its connection behind a mutex so the store can be shared between
/// caller threads and the timer thread.
pub struct SqliteTaskRepository {
    conn: Mutex<Connection>,
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
}

impl SqliteTaskRepository {
    /// Wraps a migrated connection (see `db::open_db`).
    pub fn new(conn: Connection, config: SchedulerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            conn: Mutex::new(conn),
            config,
            clock,
        }
    }

    pub fn scheduler_config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Releases the connection, reporting close failures.
    pub fn close(self) -> RepoResult<()> {
        let conn = self
            .conn
            .into_inner()
            .map_err(|_| RepoError::StorageFailure(DbError::ConnectionPoisoned))?;
        conn.close().map_err(|(_, err)| RepoError::from(err))?;
        info!("event=store_close module=repo status=ok");
        Ok(())
    }

    fn lock(&self) -> RepoResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| RepoError::StorageFailure(DbError::ConnectionPoisoned))
    }
}

impl TaskRepository for SqliteTaskRepository {
    fn create_task(&self, name: &str, description: Option<&str>) -> RepoResult<Task> {
        let name = normalize_name(name)?;
        let created_at = self.clock.now_ms();
        if created_at < 0 {
            return Err(RepoError::InvalidInput(format!(
                "clock returned a pre-epoch timestamp {created_at}"
            )));
        }

        let task = Task {
            id: Uuid::new_v4(),
            name,
            description: normalize_description(description),
            created_at,
            review_count: 0,
            current_interval_ms: self.config.initial_interval_ms,
            next_due_at: initial_due_at(&self.config, created_at),
            last_reviewed_at: None,
        };
        task.validate()?;

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO tasks (
                id,
                name,
                description,
                created_at,
                review_count,
                current_interval_ms,
                next_due_at,
                last_reviewed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
            params![
                task.id.to_string(),
                task.name.as_str(),
                task.description.as_deref(),
                task.created_at,
                task.review_count,
                task.current_interval_ms,
                task.next_due_at,
                task.last_reviewed_at,
            ],
        )
        .inspect_err(|err| {
            error!("event=task_create module=repo status=error error={err}");
        })?;

        info!(
            "event=task_create module=repo status=ok task_id={} next_due_at={}",
            task.id, task.next_due_at
        );
        Ok(task)
    }

    fn get_task(&self, id: TaskId) -> RepoResult<Task> {
        let conn = self.lock()?;
        load_task(&conn, id)?.ok_or(RepoError::NotFound(id))
    }

    fn update_task(&self, id: TaskId, patch: &TaskPatch) -> RepoResult<Task> {
        if let Some(field) = patch.derived_field() {
            return Err(RepoError::InvalidOperation(format!(
                "`{field}` is derived from the review log and cannot be patched"
            )));
        }
        let name = patch.name.as_deref().map(normalize_name).transpose()?;

        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut task = load_task(&tx, id)?.ok_or(RepoError::NotFound(id))?;
        if let Some(name) = name {
            task.name = name;
        }
        if let Some(description) = &patch.description {
            task.description = normalize_description(description.as_deref());
        }

        tx.execute(
            "UPDATE tasks
             SET name = ?1,
                 description = ?2,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?3;",
            params![task.name.as_str(), task.description.as_deref(), id.to_string()],
        )?;
        tx.commit()?;

        info!("event=task_update module=repo status=ok task_id={id}");
        Ok(task)
    }

    fn record_review(&self, id: TaskId, reviewed_at: i64) -> RepoResult<Task> {
        if reviewed_at < 0 {
            return Err(RepoError::InvalidInput(format!(
                "review timestamp must not be negative, got {reviewed_at}"
            )));
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let task = load_task(&tx, id)?.ok_or(RepoError::NotFound(id))?;

        let anchor = task.last_reviewed_at.unwrap_or(task.created_at);
        if reviewed_at < anchor {
            return Err(RepoError::InvalidInput(format!(
                "review timestamp {reviewed_at} precedes the task's last recorded activity {anchor}"
            )));
        }

        let next = next_schedule(
            &self.config,
            task.current_interval_ms,
            task.review_count,
            reviewed_at,
        );
        let updated = Task {
            review_count: task.review_count + 1,
            current_interval_ms: next.interval_ms,
            next_due_at: next.next_due_at,
            last_reviewed_at: Some(reviewed_at),
            ..task.clone()
        };
        updated.validate().map_err(|err| {
            RepoError::InvalidData(format!("review would break task invariants: {err}"))
        })?;

        tx.execute(
            "INSERT INTO review_events (
                task_id,
                sequence,
                reviewed_at,
                interval_before_ms,
                interval_after_ms
            ) VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                id.to_string(),
                updated.review_count,
                reviewed_at,
                task.current_interval_ms,
                updated.current_interval_ms,
            ],
        )?;
        write_derived_fields(&tx, &updated)?;
        tx.commit().inspect_err(|err| {
            error!("event=review_record module=repo status=error task_id={id} error={err}");
        })?;

        info!(
            "event=review_record module=repo status=ok task_id={} review_count={} interval_ms={} next_due_at={}",
            id, updated.review_count, updated.current_interval_ms, updated.next_due_at
        );
        Ok(updated)
    }

    fn delete_task(&self, id: TaskId) -> RepoResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "DELETE FROM review_events WHERE task_id = ?1;",
            [id.to_string()],
        )?;
        let changed = tx.execute("DELETE FROM tasks WHERE id = ?1;", [id.to_string()])?;
        if changed == 0 {
            return Err(RepoError::NotFound(id));
        }
        tx.commit()?;

        info!("event=task_delete module=repo status=ok task_id={id}");
        Ok(())
    }

    fn list_tasks(&self) -> RepoResult<Vec<Task>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("{TASK_SELECT_SQL} ORDER BY created_at ASC, id ASC;"))?;
        let mut rows = stmt.query([])?;
        let mut tasks = Vec::new();
        while let Some(row) = rows.next()? {
            tasks.push(parse_task_row(row)?);
        }
        Ok(tasks)
    }

    fn list_review_events(&self, id: TaskId) -> RepoResult<Vec<ReviewEvent>> {
        let conn = self.lock()?;
        if load_task(&conn, id)?.is_none() {
            return Err(RepoError::NotFound(id));
        }
        load_events(&conn, id)
    }

    fn repair_derived_fields(&self, id: TaskId) -> RepoResult<Task> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let stored = load_task_unchecked(&tx, id)?.ok_or(RepoError::NotFound(id))?;
        let events = load_events(&tx, id)?;
        let replayed = replay_events(&self.config, stored.created_at, &events);

        let repaired = Task {
            review_count: replayed.review_count,
            current_interval_ms: replayed.current_interval_ms,
            next_due_at: replayed.next_due_at,
            last_reviewed_at: replayed.last_reviewed_at,
            ..stored.clone()
        };
        repaired.validate().map_err(|err| {
            RepoError::InvalidData(format!("replayed review log is inconsistent: {err}"))
        })?;

        if repaired != stored {
            write_derived_fields(&tx, &repaired)?;
            tx.commit()?;
            warn!(
                "event=task_repair module=repo status=repaired task_id={} review_count={}",
                id, repaired.review_count
            );
        } else {
            tx.commit()?;
            info!("event=task_repair module=repo status=unchanged task_id={id}");
        }
        Ok(repaired)
    }

    fn flush(&self) -> RepoResult<()> {
        let conn = self.lock()?;
        // Returns (busy, log frames, checkpointed frames); in-memory stores
        // report -1 for both frame counts.
        let busy: i64 = conn.query_row("PRAGMA wal_checkpoint(TRUNCATE);", [], |row| row.get(0))?;
        if busy != 0 {
            warn!("event=store_flush module=repo status=busy");
        }
        Ok(())
    }
}

fn load_task(conn: &Connection, id: TaskId) -> RepoResult<Option<Task>> {
    let task = load_task_unchecked(conn, id)?;
    if let Some(task) = &task {
        task.validate().map_err(|err| {
            RepoError::InvalidData(format!("task {} violates invariants: {err}", task.id))
        })?;
    }
    Ok(task)
}

fn load_task_unchecked(conn: &Connection, id: TaskId) -> RepoResult<Option<Task>> {
    let mut stmt = conn.prepare(&format!("{TASK_SELECT_SQL} WHERE id = ?1;"))?;
    let row = stmt
        .query_row([id.to_string()], |row| Ok(parse_task_row(row)))
        .optional()?;
    row.transpose()
}

fn load_events(conn: &Connection, id: TaskId) -> RepoResult<Vec<ReviewEvent>> {
    let mut stmt = conn.prepare(
        "SELECT sequence, reviewed_at, interval_before_ms, interval_after_ms
         FROM review_events
         WHERE task_id = ?1
         ORDER BY sequence ASC;",
    )?;
    let mut rows = stmt.query([id.to_string()])?;
    let mut events = Vec::new();
    while let Some(row) = rows.next()? {
        events.push(ReviewEvent {
            task_id: id,
            sequence: row.get("sequence")?,
            reviewed_at: row.get("reviewed_at")?,
            interval_before_ms: row.get("interval_before_ms")?,
            interval_after_ms: row.get("interval_after_ms")?,
        });
    }
    Ok(events)
}

fn write_derived_fields(conn: &Connection, task: &Task) -> RepoResult<()> {
    let changed = conn.execute(
        "UPDATE tasks
         SET review_count = ?1,
             current_interval_ms = ?2,
             next_due_at = ?3,
             last_reviewed_at = ?4,
             updated_at = (strftime('%s', 'now') * 1000)
         WHERE id = ?5;",
        params![
            task.review_count,
            task.current_interval_ms,
            task.next_due_at,
            task.last_reviewed_at,
            task.id.to_string(),
        ],
    )?;
    if changed == 0 {
        return Err(RepoError::NotFound(task.id));
    }
    Ok(())
}

fn parse_task_row(row: &Row<'_>) -> RepoResult<Task> {
    let id_text: String = row.get("id")?;
    let id = Uuid::parse_str(&id_text).map_err(|_| {
        RepoError::InvalidData(format!("invalid uuid value `{id_text}` in tasks.id"))
    })?;

    let review_count: i64 = row.get("review_count")?;
    let review_count = u32::try_from(review_count).map_err(|_| {
        RepoError::InvalidData(format!(
            "invalid review_count value `{review_count}` in tasks.review_count"
        ))
    })?;

    Ok(Task {
        id,
        name: row.get("name")?,
        description: row.get("description")?,
        created_at: row.get("created_at")?,
        review_count,
        current_interval_ms: row.get("current_interval_ms")?,
        next_due_at: row.get("next_due_at")?,
        last_reviewed_at: row.get("last_reviewed_at")?,
    })
}
