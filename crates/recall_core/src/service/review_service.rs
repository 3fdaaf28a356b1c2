//! Review session use-case service.
//!
//! # Responsibility
//! - Expose create/list/review/delete operations for presentation layers.
//! - Keep the due index in step with every committed store mutation.
//! - Wake the timer when the earliest due timestamp changes.
//!
//! # Invariants
//! - The index is touched strictly after a confirmed store commit.
//! - An index failure after a commit is logged, not surfaced; the timer's
//!   reconciliation pass repairs it.
//! - Store-then-index steps of different callers never interleave; with a
//!   shared `WriteGate` this also covers the timer's reconciliation.

use crate::clock::Clock;
use crate::index::due_index::{DueIndex, IndexResult, ReconcileOutcome};
use crate::index::write_gate::WriteGate;
use crate::model::task::{ReviewEvent, Task, TaskId, TaskPatch};
use crate::repo::task_repo::{RepoError, RepoResult, TaskRepository};
use crate::timer::notification_timer::TimerWaker;
use log::{error, info};
use serde::Serialize;
use std::sync::Arc;

/// Row shape for task listings ("Near repetition" / "Repeated" columns).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskSummary {
    pub id: TaskId,
    pub name: String,
    pub description: Option<String>,
    pub created_at: i64,
    pub next_due_at: i64,
    pub review_count: u32,
    pub last_reviewed_at: Option<i64>,
    pub is_due: bool,
}

impl TaskSummary {
    fn from_task(task: Task, now_ms: i64) -> Self {
        Self {
            is_due: task.is_due(now_ms),
            id: task.id,
            name: task.name,
            description: task.description,
            created_at: task.created_at,
            next_due_at: task.next_due_at,
            review_count: task.review_count,
            last_reviewed_at: task.last_reviewed_at,
        }
    }
}

/// Use-case facade over the task store, due index and timer.
pub struct ReviewService {
    repo: Arc<dyn TaskRepository>,
    index: Arc<DueIndex>,
    clock: Arc<dyn Clock>,
    waker: Option<TimerWaker>,
    gate: WriteGate,
}

impl ReviewService {
    pub fn new(
        repo: Arc<dyn TaskRepository>,
        index: Arc<DueIndex>,
        clock: Arc<dyn Clock>,
        waker: Option<TimerWaker>,
    ) -> Self {
        Self {
            repo,
            index,
            clock,
            waker,
            gate: WriteGate::new(),
        }
    }

    /// Shares `gate` with other index writers (the timer).
    pub fn with_write_gate(mut self, gate: WriteGate) -> Self {
        self.gate = gate;
        self
    }

    /// Creates a task and registers its first due timestamp.
    pub fn create_task(&self, name: &str, description: Option<&str>) -> RepoResult<Task> {
        let _gate = self.gate.enter();
        let task = self.repo.create_task(name, description)?;
        self.after_commit("create", task.id, self.index.upsert(task.id, task.next_due_at));
        Ok(task)
    }

    pub fn get_task(&self, id: TaskId) -> RepoResult<Task> {
        self.repo.get_task(id)
    }

    /// Renames or re-describes a task. Scheduling fields are rejected.
    pub fn update_task(&self, id: TaskId, patch: &TaskPatch) -> RepoResult<Task> {
        self.repo.update_task(id, patch)
    }

    /// Records a review at `at` (defaults to now) and reschedules the task.
    pub fn submit_review(&self, id: TaskId, at: Option<i64>) -> RepoResult<Task> {
        let reviewed_at = at.unwrap_or_else(|| self.clock.now_ms());
        let _gate = self.gate.enter();
        let task = self.repo.record_review(id, reviewed_at)?;
        self.after_commit("review", id, self.index.upsert(id, task.next_due_at));
        Ok(task)
    }

    /// Deletes a task and drops it from the due index.
    pub fn delete_task(&self, id: TaskId) -> RepoResult<()> {
        let _gate = self.gate.enter();
        self.repo.delete_task(id)?;
        self.after_commit("delete", id, self.index.remove(id));
        Ok(())
    }

    /// Summarizes `task` against this service's clock.
    pub fn summarize(&self, task: Task) -> TaskSummary {
        TaskSummary::from_task(task, self.clock.now_ms())
    }

    /// Lists task summaries ordered by `(next_due_at, id)`.
    pub fn list_tasks(&self) -> RepoResult<Vec<TaskSummary>> {
        let now = self.clock.now_ms();
        let mut tasks = self.repo.list_tasks()?;
        tasks.sort_by_key(|task| (task.next_due_at, task.id));
        Ok(tasks
            .into_iter()
            .map(|task| TaskSummary::from_task(task, now))
            .collect())
    }

    /// Summaries of tasks due now, in emission order.
    pub fn due_tasks(&self) -> RepoResult<Vec<TaskSummary>> {
        let now = self.clock.now_ms();
        let due = match self.index.due_before(now) {
            Ok(due) => due,
            Err(err) => {
                error!("event=due_query module=service status=index_error error={err}");
                let _gate = self.gate.enter();
                self.index.rebuild_from_store(self.repo.as_ref())?;
                self.index.due_before(now).unwrap_or_default()
            }
        };

        let mut summaries = Vec::with_capacity(due.len());
        for task_id in due.task_ids() {
            match self.repo.get_task(task_id) {
                Ok(task) if task.is_due(now) => summaries.push(TaskSummary::from_task(task, now)),
                Ok(_) | Err(RepoError::NotFound(_)) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(summaries)
    }

    pub fn review_history(&self, id: TaskId) -> RepoResult<Vec<ReviewEvent>> {
        self.repo.list_review_events(id)
    }

    /// Replays the review log into the task's cached fields.
    pub fn repair_task(&self, id: TaskId) -> RepoResult<Task> {
        let _gate = self.gate.enter();
        let task = self.repo.repair_derived_fields(id)?;
        self.after_commit("repair", id, self.index.upsert(id, task.next_due_at));
        Ok(task)
    }

    /// Compares the index against the store and rebuilds it on drift.
    pub fn reconcile_index(&self) -> RepoResult<ReconcileOutcome> {
        let _gate = self.gate.enter();
        let outcome = self.index.reconcile_with_store(self.repo.as_ref())?;
        if matches!(outcome, ReconcileOutcome::Rebuilt { .. }) {
            self.wake_timer();
        }
        Ok(outcome)
    }

    fn after_commit(&self, operation: &'static str, id: TaskId, result: IndexResult<bool>) {
        match result {
            Ok(head_changed) => {
                info!(
                    "event=index_update module=service status=ok op={operation} task_id={id} head_changed={head_changed}"
                );
                if head_changed {
                    self.wake_timer();
                }
            }
            Err(err) => {
                // Store already committed; reconciliation repairs the index.
                error!(
                    "event=index_update module=service status=error op={operation} task_id={id} error={err}"
                );
                self.wake_timer();
            }
        }
    }

    fn wake_timer(&self) {
        if let Some(waker) = &self.waker {
            waker.wake();
        }
    }
}
