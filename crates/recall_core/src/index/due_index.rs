//! Due-set index implementation.

use crate::model::task::{Task, TaskId};
use crate::repo::task_repo::{RepoResult, TaskRepository};
use log::{info, warn};
use std::collections::{BTreeSet, HashMap};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::ops::Bound;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

pub type IndexResult<T> = Result<T, IndexError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexError {
    /// A writer panicked mid-update; the ordering can no longer be trusted
    /// until the next rebuild.
    Poisoned,
}

impl Display for IndexError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Poisoned => write!(f, "due index lock is poisoned; rebuild required"),
        }
    }
}

impl Error for IndexError {}

/// One `(due_at, task_id)` pair.
///
/// Field order drives the derived `Ord`: due timestamp first, id as tiebreak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DueEntry {
    pub due_at: i64,
    pub task_id: TaskId,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct DueEntries {
    ordered: BTreeSet<DueEntry>,
    by_id: HashMap<TaskId, i64>,
}

impl DueEntries {
    fn from_tasks(tasks: &[Task]) -> Self {
        let mut entries = Self::default();
        for task in tasks {
            entries.upsert(task.id, task.next_due_at);
        }
        entries
    }

    fn upsert(&mut self, task_id: TaskId, due_at: i64) {
        if let Some(previous) = self.by_id.insert(task_id, due_at) {
            self.ordered.remove(&DueEntry {
                due_at: previous,
                task_id,
            });
        }
        self.ordered.insert(DueEntry { due_at, task_id });
    }

    fn remove(&mut self, task_id: TaskId) -> bool {
        match self.by_id.remove(&task_id) {
            Some(due_at) => self.ordered.remove(&DueEntry { due_at, task_id }),
            None => false,
        }
    }

    fn first(&self) -> Option<DueEntry> {
        self.ordered.first().copied()
    }
}

/// Restartable snapshot of due entries, in ascending due order.
///
/// Taken under the index lock; later index mutations are not observed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DueSnapshot {
    entries: Arc<[DueEntry]>,
}

impl DueSnapshot {
    pub fn iter(&self) -> std::slice::Iter<'_, DueEntry> {
        self.entries.iter()
    }

    pub fn task_ids(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.entries.iter().map(|entry| entry.task_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> IntoIterator for &'a DueSnapshot {
    type Item = &'a DueEntry;
    type IntoIter = std::slice::Iter<'a, DueEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Result of comparing the live index with a fresh store scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Consistent,
    /// The live index drifted and was replaced.
    Rebuilt { live_entries: usize, store_entries: usize },
}

/// Thread-safe due-order index.
///
/// Guarded by its own lock, independent of the store's connection lock.
#[derive(Debug, Default)]
pub struct DueIndex {
    inner: Mutex<DueEntries>,
}

impl DueIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an index from a task snapshot.
    pub fn from_tasks(tasks: &[Task]) -> Self {
        Self {
            inner: Mutex::new(DueEntries::from_tasks(tasks)),
        }
    }

    /// Inserts or moves one task. Returns whether the head entry changed.
    pub fn upsert(&self, task_id: TaskId, due_at: i64) -> IndexResult<bool> {
        let mut entries = self.lock()?;
        let head_before = entries.first();
        entries.upsert(task_id, due_at);
        Ok(entries.first() != head_before)
    }

    /// Removes one task; absent ids are a no-op. Returns whether the head
    /// entry changed.
    pub fn remove(&self, task_id: TaskId) -> IndexResult<bool> {
        let mut entries = self.lock()?;
        let head_before = entries.first();
        entries.remove(task_id);
        Ok(entries.first() != head_before)
    }

    /// Entry with the smallest `(due_at, task_id)`.
    pub fn peek_next(&self) -> IndexResult<Option<DueEntry>> {
        Ok(self.lock()?.first())
    }

    /// All entries with `due_at <= now_ms`, ascending.
    pub fn due_before(&self, now_ms: i64) -> IndexResult<DueSnapshot> {
        let entries = self.lock()?;
        let due: Vec<DueEntry> = entries
            .ordered
            .iter()
            .take_while(|entry| entry.due_at <= now_ms)
            .copied()
            .collect();
        Ok(DueSnapshot {
            entries: due.into(),
        })
    }

    /// Smallest due timestamp strictly after `now_ms`.
    pub fn next_due_after(&self, now_ms: i64) -> IndexResult<Option<i64>> {
        let entries = self.lock()?;
        let bound = DueEntry {
            due_at: now_ms,
            task_id: Uuid::from_u128(u128::MAX),
        };
        Ok(entries
            .ordered
            .range((Bound::Excluded(bound), Bound::Unbounded))
            .next()
            .map(|entry| entry.due_at))
    }

    pub fn due_at(&self, task_id: TaskId) -> IndexResult<Option<i64>> {
        Ok(self.lock()?.by_id.get(&task_id).copied())
    }

    /// Full ordered copy of the index.
    pub fn snapshot(&self) -> IndexResult<Vec<DueEntry>> {
        Ok(self.lock()?.ordered.iter().copied().collect())
    }

    pub fn len(&self) -> IndexResult<usize> {
        Ok(self.lock()?.ordered.len())
    }

    pub fn is_empty(&self) -> IndexResult<bool> {
        Ok(self.lock()?.ordered.is_empty())
    }

    /// Replaces the whole index from a task snapshot.
    ///
    /// Clears lock poisoning: a rebuild discards any torn state.
    pub fn rebuild(&self, tasks: &[Task]) {
        let fresh = DueEntries::from_tasks(tasks);
        let mut entries = self.lock_recovering();
        *entries = fresh;
    }

    /// Rebuilds the index from a full store scan.
    pub fn rebuild_from_store(&self, repo: &dyn TaskRepository) -> RepoResult<usize> {
        let tasks = repo.list_tasks()?;
        self.rebuild(&tasks);
        info!(
            "event=index_rebuild module=index status=ok entries={}",
            tasks.len()
        );
        Ok(tasks.len())
    }

    /// Compares the live index against a store scan and rebuilds on drift.
    pub fn reconcile_with_store(&self, repo: &dyn TaskRepository) -> RepoResult<ReconcileOutcome> {
        let tasks = repo.list_tasks()?;
        let expected = DueEntries::from_tasks(&tasks);

        let mut entries = self.lock_recovering();
        if *entries == expected {
            return Ok(ReconcileOutcome::Consistent);
        }

        let live_entries = entries.ordered.len();
        let store_entries = expected.ordered.len();
        *entries = expected;
        warn!(
            "event=index_reconcile module=index status=inconsistent live_entries={live_entries} store_entries={store_entries}"
        );
        Ok(ReconcileOutcome::Rebuilt {
            live_entries,
            store_entries,
        })
    }

    fn lock(&self) -> IndexResult<MutexGuard<'_, DueEntries>> {
        self.inner.lock().map_err(|_| IndexError::Poisoned)
    }

    fn lock_recovering(&self) -> MutexGuard<'_, DueEntries> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                self.inner.clear_poison();
                poisoned.into_inner()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DueEntry, DueIndex, IndexError};
    use std::sync::Arc;
    use uuid::Uuid;

    fn ordered_ids() -> (Uuid, Uuid, Uuid) {
        let mut ids = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        ids.sort();
        (ids[0], ids[1], ids[2])
    }

    #[test]
    fn upsert_moves_existing_entry() {
        let index = DueIndex::new();
        let (a, b, _) = ordered_ids();
        index.upsert(a, 100).unwrap();
        index.upsert(b, 200).unwrap();
        index.upsert(a, 300).unwrap();

        let snapshot = index.snapshot().unwrap();
        assert_eq!(
            snapshot,
            vec![
                DueEntry {
                    due_at: 200,
                    task_id: b
                },
                DueEntry {
                    due_at: 300,
                    task_id: a
                },
            ]
        );
        assert_eq!(index.len().unwrap(), 2);
    }

    #[test]
    fn upsert_and_remove_report_head_changes() {
        let index = DueIndex::new();
        let (a, b, _) = ordered_ids();
        assert!(index.upsert(a, 100).unwrap());
        assert!(!index.upsert(b, 200).unwrap());
        assert!(!index.remove(b).unwrap());
        assert!(index.remove(a).unwrap());
        assert!(index.peek_next().unwrap().is_none());
    }

    #[test]
    fn remove_absent_id_is_noop() {
        let index = DueIndex::new();
        assert!(!index.remove(Uuid::new_v4()).unwrap());
        assert!(index.is_empty().unwrap());
    }

    #[test]
    fn due_before_is_inclusive_and_ordered_with_id_tiebreak() {
        let index = DueIndex::new();
        let (a, b, c) = ordered_ids();
        index.upsert(c, 50).unwrap();
        index.upsert(b, 50).unwrap();
        index.upsert(a, 60).unwrap();
        index.upsert(Uuid::new_v4(), 61).unwrap();

        let due: Vec<Uuid> = index.due_before(60).unwrap().task_ids().collect();
        assert_eq!(due, vec![b, c, a]);
    }

    #[test]
    fn due_snapshot_ignores_later_mutations_and_restarts() {
        let index = DueIndex::new();
        let (a, b, _) = ordered_ids();
        index.upsert(a, 10).unwrap();
        let snapshot = index.due_before(100).unwrap();

        index.upsert(b, 5).unwrap();
        index.remove(a).unwrap();

        let first_pass: Vec<Uuid> = snapshot.task_ids().collect();
        let second_pass: Vec<Uuid> = snapshot.iter().map(|entry| entry.task_id).collect();
        assert_eq!(first_pass, vec![a]);
        assert_eq!(first_pass, second_pass);
    }

    #[test]
    fn next_due_after_skips_entries_at_now() {
        let index = DueIndex::new();
        let (a, b, _) = ordered_ids();
        index.upsert(a, 100).unwrap();
        index.upsert(b, 250).unwrap();

        assert_eq!(index.next_due_after(99).unwrap(), Some(100));
        assert_eq!(index.next_due_after(100).unwrap(), Some(250));
        assert_eq!(index.next_due_after(250).unwrap(), None);
    }

    #[test]
    fn poisoned_index_reports_error_until_rebuilt() {
        let index = Arc::new(DueIndex::new());
        let id = Uuid::new_v4();
        index.upsert(id, 1).unwrap();

        let poisoner = Arc::clone(&index);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.inner.lock().unwrap();
            panic!("poison the index");
        })
        .join();

        assert_eq!(index.peek_next().unwrap_err(), IndexError::Poisoned);
        index.rebuild(&[]);
        assert!(index.is_empty().unwrap());
    }
}
