use recall_core::db::{open_db, open_db_in_memory};
use recall_core::{
    replay_events, ManualClock, RepoError, SchedulerConfig, SqliteTaskRepository, TaskPatch,
    TaskRepository, MILLIS_PER_DAY,
};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

const DAY: i64 = MILLIS_PER_DAY;
const T0: i64 = 1_700_000_000_000;

fn setup() -> (SqliteTaskRepository, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(T0));
    let repo = SqliteTaskRepository::new(
        open_db_in_memory().unwrap(),
        SchedulerConfig::default(),
        clock.clone(),
    );
    (repo, clock)
}

#[test]
fn create_then_get_returns_fresh_schedule() {
    let (repo, _clock) = setup();

    let created = repo
        .create_task("  Chapter 3: Ownership ", Some("re-read the drop rules"))
        .unwrap();
    let loaded = repo.get_task(created.id).unwrap();

    assert_eq!(loaded, created);
    assert_eq!(loaded.name, "Chapter 3: Ownership");
    assert_eq!(loaded.description.as_deref(), Some("re-read the drop rules"));
    assert_eq!(loaded.created_at, T0);
    assert_eq!(loaded.review_count, 0);
    assert_eq!(loaded.current_interval_ms, DAY);
    assert_eq!(loaded.next_due_at, loaded.created_at + DAY);
    assert_eq!(loaded.last_reviewed_at, None);
}

#[test]
fn create_rejects_blank_name_without_writing() {
    let (repo, _clock) = setup();

    let err = repo.create_task(" \t ", None).unwrap_err();
    assert!(matches!(err, RepoError::InvalidInput(_)));
    assert!(repo.list_tasks().unwrap().is_empty());
}

#[test]
fn created_ids_are_unique() {
    let (repo, _clock) = setup();

    let ids: HashSet<Uuid> = (0..50)
        .map(|n| repo.create_task(&format!("task {n}"), None).unwrap().id)
        .collect();
    assert_eq!(ids.len(), 50);
}

#[test]
fn get_unknown_id_is_not_found() {
    let (repo, _clock) = setup();
    let missing = Uuid::new_v4();

    let err = repo.get_task(missing).unwrap_err();
    assert!(matches!(err, RepoError::NotFound(id) if id == missing));
}

#[test]
fn update_changes_name_and_description_only() {
    let (repo, _clock) = setup();
    let task = repo.create_task("Lifetimes", Some("elision")).unwrap();

    let renamed = repo
        .update_task(task.id, &TaskPatch::rename("Lifetimes, part 2"))
        .unwrap();
    assert_eq!(renamed.name, "Lifetimes, part 2");
    assert_eq!(renamed.next_due_at, task.next_due_at);

    let cleared = repo
        .update_task(task.id, &TaskPatch::describe(None))
        .unwrap();
    assert_eq!(cleared.description, None);
    assert_eq!(repo.get_task(task.id).unwrap(), cleared);
}

#[test]
fn update_rejects_derived_fields() {
    let (repo, _clock) = setup();
    let task = repo.create_task("Traits", None).unwrap();

    let patches = [
        TaskPatch {
            review_count: Some(5),
            ..TaskPatch::default()
        },
        TaskPatch {
            current_interval_ms: Some(DAY),
            ..TaskPatch::default()
        },
        TaskPatch {
            name: Some("sneaky".to_string()),
            next_due_at: Some(T0),
            ..TaskPatch::default()
        },
    ];
    for patch in &patches {
        let err = repo.update_task(task.id, patch).unwrap_err();
        assert!(matches!(err, RepoError::InvalidOperation(_)), "{err}");
    }
    assert_eq!(repo.get_task(task.id).unwrap(), task);
}

#[test]
fn update_rejects_blank_rename_and_unknown_id() {
    let (repo, _clock) = setup();
    let task = repo.create_task("Closures", None).unwrap();

    let err = repo
        .update_task(task.id, &TaskPatch::rename("   "))
        .unwrap_err();
    assert!(matches!(err, RepoError::InvalidInput(_)));

    let err = repo
        .update_task(Uuid::new_v4(), &TaskPatch::rename("x"))
        .unwrap_err();
    assert!(matches!(err, RepoError::NotFound(_)));
}

#[test]
fn reviews_follow_growth_policy() {
    let (repo, _clock) = setup();
    let task = repo.create_task("Task A", None).unwrap();
    assert_eq!(task.next_due_at, T0 + DAY);

    let first = repo.record_review(task.id, T0 + DAY).unwrap();
    assert_eq!(first.current_interval_ms, DAY);
    assert_eq!(first.next_due_at, T0 + 2 * DAY);

    let second = repo.record_review(task.id, T0 + 2 * DAY).unwrap();
    assert_eq!(second.current_interval_ms, 2 * DAY);
    assert_eq!(second.next_due_at, T0 + 4 * DAY);
    assert_eq!(second.review_count, 2);
    assert_eq!(second.last_reviewed_at, Some(T0 + 2 * DAY));
}

#[test]
fn reviews_are_monotonic_and_capped() {
    let (repo, _clock) = setup();
    let task = repo.create_task("Macros", None).unwrap();

    let mut previous = repo.get_task(task.id).unwrap();
    for _ in 0..12 {
        let at = previous.next_due_at;
        let next = repo.record_review(task.id, at).unwrap();
        assert_eq!(next.review_count, previous.review_count + 1);
        assert!(next.current_interval_ms >= previous.current_interval_ms);
        assert!(next.current_interval_ms <= 180 * DAY);
        assert!(next.next_due_at >= at);
        previous = next;
    }
    assert_eq!(previous.current_interval_ms, 180 * DAY);
    assert_eq!(previous.review_count, 12);
}

#[test]
fn review_rejects_bad_timestamps_and_unknown_ids() {
    let (repo, _clock) = setup();
    let task = repo.create_task("Iterators", None).unwrap();

    assert!(matches!(
        repo.record_review(task.id, -1).unwrap_err(),
        RepoError::InvalidInput(_)
    ));
    assert!(matches!(
        repo.record_review(task.id, T0 - 1).unwrap_err(),
        RepoError::InvalidInput(_)
    ));

    repo.record_review(task.id, T0 + 10).unwrap();
    assert!(matches!(
        repo.record_review(task.id, T0 + 5).unwrap_err(),
        RepoError::InvalidInput(_)
    ));
    assert!(matches!(
        repo.record_review(Uuid::new_v4(), T0).unwrap_err(),
        RepoError::NotFound(_)
    ));

    let stored = repo.get_task(task.id).unwrap();
    assert_eq!(stored.review_count, 1);
    assert_eq!(repo.list_review_events(task.id).unwrap().len(), 1);
}

#[test]
fn review_log_replays_to_stored_fields() {
    let (repo, _clock) = setup();
    let task = repo.create_task("Smart pointers", None).unwrap();
    for offset in [DAY, 2 * DAY, 5 * DAY, 9 * DAY, 30 * DAY] {
        repo.record_review(task.id, T0 + offset).unwrap();
    }

    let stored = repo.get_task(task.id).unwrap();
    let events = repo.list_review_events(task.id).unwrap();
    let replayed = replay_events(&SchedulerConfig::default(), stored.created_at, &events);

    assert_eq!(replayed.review_count, stored.review_count);
    assert_eq!(replayed.current_interval_ms, stored.current_interval_ms);
    assert_eq!(replayed.next_due_at, stored.next_due_at);
    assert_eq!(replayed.last_reviewed_at, stored.last_reviewed_at);

    let sequences: Vec<u32> = events.iter().map(|event| event.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3, 4, 5]);
    for pair in events.windows(2) {
        assert_eq!(pair[1].interval_before_ms, pair[0].interval_after_ms);
    }
}

#[test]
fn repair_restores_derived_fields_from_log() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("recall.db");
    let clock = Arc::new(ManualClock::new(T0));
    let repo = SqliteTaskRepository::new(
        open_db(&path).unwrap(),
        SchedulerConfig::default(),
        clock.clone(),
    );
    let task = repo.create_task("Generics", None).unwrap();
    repo.record_review(task.id, T0 + DAY).unwrap();
    let expected = repo.record_review(task.id, T0 + 2 * DAY).unwrap();

    let side_conn = rusqlite::Connection::open(&path).unwrap();
    side_conn
        .execute(
            "UPDATE tasks SET review_count = 0, current_interval_ms = 1, next_due_at = ?1,
                 last_reviewed_at = NULL WHERE id = ?2;",
            rusqlite::params![T0 + 10, task.id.to_string()],
        )
        .unwrap();
    drop(side_conn);

    let repaired = repo.repair_derived_fields(task.id).unwrap();
    assert_eq!(repaired, expected);
    assert_eq!(repo.get_task(task.id).unwrap(), expected);

    let unchanged = repo.repair_derived_fields(task.id).unwrap();
    assert_eq!(unchanged, expected);
}

#[test]
fn delete_removes_task_and_events() {
    let (repo, _clock) = setup();
    let task = repo.create_task("Error handling", None).unwrap();
    repo.record_review(task.id, T0 + DAY).unwrap();

    repo.delete_task(task.id).unwrap();

    assert!(matches!(
        repo.get_task(task.id).unwrap_err(),
        RepoError::NotFound(_)
    ));
    assert!(matches!(
        repo.list_review_events(task.id).unwrap_err(),
        RepoError::NotFound(_)
    ));
    assert!(matches!(
        repo.delete_task(task.id).unwrap_err(),
        RepoError::NotFound(_)
    ));
}

#[test]
fn list_returns_every_task() {
    let (repo, clock) = setup();
    let a = repo.create_task("A", None).unwrap();
    clock.advance(1_000);
    let b = repo.create_task("B", None).unwrap();

    let listed: HashSet<Uuid> = repo.list_tasks().unwrap().into_iter().map(|t| t.id).collect();
    assert_eq!(listed, HashSet::from([a.id, b.id]));
}

#[test]
fn accepted_writes_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("recall.db");
    let clock = Arc::new(ManualClock::new(T0));

    let (task_id, reviewed) = {
        let repo = SqliteTaskRepository::new(
            open_db(&path).unwrap(),
            SchedulerConfig::default(),
            clock.clone(),
        );
        let task = repo.create_task("Concurrency", None).unwrap();
        let reviewed = repo.record_review(task.id, T0 + DAY).unwrap();
        repo.close().unwrap();
        (task.id, reviewed)
    };

    let reopened = SqliteTaskRepository::new(
        open_db(&path).unwrap(),
        SchedulerConfig::default(),
        clock,
    );
    assert_eq!(reopened.get_task(task_id).unwrap(), reviewed);
    assert_eq!(reopened.list_review_events(task_id).unwrap().len(), 1);
}

#[test]
fn concurrent_reviews_on_one_task_never_interleave() {
    let (repo, _clock) = setup();
    let repo = Arc::new(repo);
    let task = repo.create_task("Send and Sync", None).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let repo = Arc::clone(&repo);
            std::thread::spawn(move || {
                for _ in 0..5 {
                    repo.record_review(task.id, T0 + DAY).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let stored = repo.get_task(task.id).unwrap();
    let events = repo.list_review_events(task.id).unwrap();
    assert_eq!(stored.review_count, 20);
    assert_eq!(events.len(), 20);
    let replayed = replay_events(&SchedulerConfig::default(), stored.created_at, &events);
    assert_eq!(replayed.current_interval_ms, stored.current_interval_ms);
    assert_eq!(replayed.next_due_at, stored.next_due_at);
}
