//! Timer state machine and its dedicated worker thread.

use crate::clock::Clock;
use crate::config::TimerConfig;
use crate::index::due_index::{DueEntry, DueIndex, ReconcileOutcome};
use crate::index::write_gate::WriteGate;
use crate::model::task::{Task, TaskId};
use crate::notify::sink::{DueNotice, NotificationSink};
use crate::repo::task_repo::{RepoError, TaskRepository};
use log::{debug, error, info, warn};
use std::collections::{HashMap, HashSet};
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

const TIMER_THREAD_NAME: &str = "recall-timer";
/// Upper bound for one uninterrupted sleep, so wall-clock jumps (suspend,
/// manual clock changes) are noticed without an explicit wake.
const MAX_SLEEP_SLICE_MS: i64 = 30_000;

/// Observable timer phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    /// Index is empty; only periodic reconciliation is scheduled.
    Idle,
    /// Sleeping until the next due timestamp or a wake signal.
    Waiting,
    /// Delivering due reminders.
    Firing,
    /// Shutdown completed; the worker thread has exited.
    Stopped,
}

impl Display for TimerState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Waiting => "waiting",
            Self::Firing => "firing",
            Self::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Default)]
struct WakeSignal {
    generation: u64,
    shutdown: bool,
}

#[derive(Debug)]
struct TimerControl {
    signal: Mutex<WakeSignal>,
    condvar: Condvar,
    state: Mutex<TimerState>,
    completed_cycles: AtomicU64,
}

impl TimerControl {
    fn new(initial: TimerState) -> Self {
        Self {
            signal: Mutex::new(WakeSignal::default()),
            condvar: Condvar::new(),
            state: Mutex::new(initial),
            completed_cycles: AtomicU64::new(0),
        }
    }

    fn signal(&self) -> MutexGuard<'_, WakeSignal> {
        self.signal
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn wake(&self) {
        let mut signal = self.signal();
        signal.generation = signal.generation.wrapping_add(1);
        self.condvar.notify_all();
    }

    fn request_shutdown(&self) {
        let mut signal = self.signal();
        signal.shutdown = true;
        self.condvar.notify_all();
    }

    fn state(&self) -> TimerState {
        *self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, next: TimerState) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *state != next {
            debug!("event=timer_transition module=timer from={} to={}", *state, next);
            *state = next;
        }
    }
}

/// Cheap cloneable handle used by mutation paths to nudge the timer.
#[derive(Debug, Clone)]
pub struct TimerWaker {
    control: Arc<TimerControl>,
}

impl TimerWaker {
    /// Asks the timer to recompute its sleep target.
    pub fn wake(&self) {
        self.control.wake();
    }
}

/// Timer state machine. Build with `new`, then `spawn` onto its own thread.
pub struct NotificationTimer {
    repo: Arc<dyn TaskRepository>,
    index: Arc<DueIndex>,
    sink: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    config: TimerConfig,
    control: Arc<TimerControl>,
    gate: WriteGate,
    /// Earliest moment each still-due task may be emitted again.
    suppressed_until: HashMap<TaskId, i64>,
    next_reconcile_at: i64,
}

impl NotificationTimer {
    pub fn new(
        repo: Arc<dyn TaskRepository>,
        index: Arc<DueIndex>,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
        config: TimerConfig,
    ) -> Self {
        let initial = if index.is_empty().unwrap_or(false) {
            TimerState::Idle
        } else {
            TimerState::Waiting
        };
        let next_reconcile_at = clock.now_ms().saturating_add(config.reconcile_interval_ms);
        Self {
            repo,
            index,
            sink,
            clock,
            config,
            control: Arc::new(TimerControl::new(initial)),
            gate: WriteGate::new(),
            suppressed_until: HashMap::new(),
            next_reconcile_at,
        }
    }

    pub fn waker(&self) -> TimerWaker {
        TimerWaker {
            control: Arc::clone(&self.control),
        }
    }

    pub fn state(&self) -> TimerState {
        self.control.state()
    }

    /// Gate to share with the service so both mirror store state into the
    /// index one writer at a time.
    pub fn write_gate(&self) -> WriteGate {
        self.gate.clone()
    }

    /// Moves the timer onto a dedicated worker thread.
    pub fn spawn(self) -> std::io::Result<TimerHandle> {
        let control = Arc::clone(&self.control);
        let join = std::thread::Builder::new()
            .name(TIMER_THREAD_NAME.to_string())
            .spawn(move || self.run())?;
        Ok(TimerHandle {
            control,
            join: Some(join),
        })
    }

    fn run(mut self) {
        info!(
            "event=timer_start module=timer status=ok state={}",
            self.control.state()
        );
        let mut seen_generation = self.control.signal().generation;

        'cycles: loop {
            if self.control.signal().shutdown {
                break;
            }

            let wake_at = self.run_cycle();

            let mut signal = self.control.signal();
            loop {
                if signal.shutdown {
                    break 'cycles;
                }
                if signal.generation != seen_generation {
                    seen_generation = signal.generation;
                    continue 'cycles;
                }
                let remaining = wake_at.saturating_sub(self.clock.now_ms());
                if remaining <= 0 {
                    continue 'cycles;
                }
                let slice = remaining.min(MAX_SLEEP_SLICE_MS) as u64;
                signal = match self
                    .control
                    .condvar
                    .wait_timeout(signal, Duration::from_millis(slice))
                {
                    Ok((guard, _)) => guard,
                    Err(poisoned) => poisoned.into_inner().0,
                };
            }
        }

        self.control.set_state(TimerState::Stopped);
        info!("event=timer_stop module=timer status=ok");
    }

    /// Runs one check-and-fire pass and returns the next wake timestamp.
    ///
    /// Public so the state machine can be driven synchronously.
    pub fn run_cycle(&mut self) -> i64 {
        let now = self.clock.now_ms();
        if now >= self.next_reconcile_at {
            self.reconcile();
            self.next_reconcile_at = now.saturating_add(self.config.reconcile_interval_ms);
        }

        let due = match self.index.due_before(now) {
            Ok(due) => due,
            Err(err) => {
                warn!("event=timer_cycle module=timer status=index_error error={err}");
                self.reconcile();
                self.index.due_before(now).unwrap_or_default()
            }
        };

        let due_ids: HashSet<TaskId> = due.task_ids().collect();
        self.suppressed_until.retain(|id, _| due_ids.contains(id));

        let eligible: Vec<DueEntry> = due
            .iter()
            .filter(|entry| {
                self.suppressed_until
                    .get(&entry.task_id)
                    .map_or(true, |until| *until <= now)
            })
            .copied()
            .collect();

        if !eligible.is_empty() {
            self.control.set_state(TimerState::Firing);
            self.fire(&eligible, now);
        }

        let wake_at = self.next_wake_at(now);
        let settled = if self.index.is_empty().unwrap_or(false) {
            TimerState::Idle
        } else {
            TimerState::Waiting
        };
        self.control.completed_cycles.fetch_add(1, Ordering::SeqCst);
        self.control.set_state(settled);
        wake_at
    }

    fn fire(&mut self, entries: &[DueEntry], now: i64) {
        let mut delivered = 0_usize;
        let mut failed = 0_usize;

        for entry in entries {
            let task = match self.confirm_due(entry, now) {
                DueCheck::Deliver(task) => task,
                DueCheck::Skip => continue,
                DueCheck::StoreError => {
                    self.suppress(entry.task_id, now, self.config.retry_delay_ms);
                    failed += 1;
                    continue;
                }
            };

            let notice = DueNotice {
                task_id: task.id,
                task_name: task.name,
                due_at: task.next_due_at,
            };
            match self.sink.deliver(&notice) {
                Ok(()) => {
                    self.suppress(notice.task_id, now, self.config.dedup_window_ms);
                    delivered += 1;
                }
                Err(err) => {
                    warn!(
                        "event=notice_deliver module=timer status=error task_id={} error={}",
                        notice.task_id, err
                    );
                    self.suppress(notice.task_id, now, self.config.retry_delay_ms);
                    failed += 1;
                }
            }
        }

        info!(
            "event=timer_fire module=timer status=ok delivered={delivered} failed={failed}"
        );
    }

    /// Re-reads the task and re-indexes it when the index entry is stale.
    fn confirm_due(&self, entry: &DueEntry, now: i64) -> DueCheck {
        let _gate = self.gate.enter();
        let task = match self.repo.get_task(entry.task_id) {
            Ok(task) => task,
            Err(RepoError::NotFound(id)) => {
                warn!(
                    "event=timer_fire module=timer status=inconsistent task_id={id} reason=missing_in_store"
                );
                let _ = self.index.remove(id);
                return DueCheck::Skip;
            }
            Err(err) => {
                error!(
                    "event=timer_fire module=timer status=error task_id={} error={}",
                    entry.task_id, err
                );
                return DueCheck::StoreError;
            }
        };

        if task.next_due_at != entry.due_at {
            warn!(
                "event=timer_fire module=timer status=inconsistent task_id={} index_due_at={} store_due_at={}",
                task.id, entry.due_at, task.next_due_at
            );
            let _ = self.index.upsert(task.id, task.next_due_at);
            if !task.is_due(now) {
                return DueCheck::Skip;
            }
        }
        DueCheck::Deliver(task)
    }

    fn suppress(&mut self, task_id: TaskId, now: i64, window_ms: i64) {
        self.suppressed_until
            .insert(task_id, now.saturating_add(window_ms));
    }

    fn next_wake_at(&self, now: i64) -> i64 {
        let next_due = self.index.next_due_after(now).ok().flatten();
        let next_retry = self
            .suppressed_until
            .values()
            .copied()
            .filter(|until| *until > now)
            .min();

        [next_due, next_retry, Some(self.next_reconcile_at)]
            .into_iter()
            .flatten()
            .min()
            .unwrap_or(self.next_reconcile_at)
    }

    fn reconcile(&self) {
        let _gate = self.gate.enter();
        match self.index.reconcile_with_store(self.repo.as_ref()) {
            Ok(ReconcileOutcome::Consistent) => {
                debug!("event=index_reconcile module=timer status=consistent");
            }
            Ok(ReconcileOutcome::Rebuilt { .. }) => {
                info!("event=index_reconcile module=timer status=rebuilt");
            }
            Err(err) => {
                error!("event=index_reconcile module=timer status=error error={err}");
            }
        }
    }
}

enum DueCheck {
    Deliver(Task),
    Skip,
    StoreError,
}

/// Owner handle for a running timer thread.
///
/// Dropping the handle requests shutdown and joins the thread.
#[derive(Debug)]
pub struct TimerHandle {
    control: Arc<TimerControl>,
    join: Option<JoinHandle<()>>,
}

impl TimerHandle {
    pub fn state(&self) -> TimerState {
        self.control.state()
    }

    pub fn waker(&self) -> TimerWaker {
        TimerWaker {
            control: Arc::clone(&self.control),
        }
    }

    pub fn wake(&self) {
        self.control.wake();
    }

    /// Number of finished check-and-fire passes since start.
    pub fn completed_cycles(&self) -> u64 {
        self.control.completed_cycles.load(Ordering::SeqCst)
    }

    /// Requests shutdown and waits for the worker to exit.
    ///
    /// An in-flight firing pass completes first; no new sleep starts.
    pub fn shutdown(&mut self) {
        self.control.request_shutdown();
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                error!("event=timer_stop module=timer status=error reason=worker_panicked");
                self.control.set_state(TimerState::Stopped);
            }
        }
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
