//! Process-scoped runtime wiring store, index, service and timer.
//!
//! # Responsibility
//! - Open the durable store and rebuild the due index from it.
//! - Start the timer thread and hand out the review service.
//! - Tear everything down in order: timer, then store flush and close.
//!
//! # Invariants
//! - The index is rebuilt from the store before the timer starts.
//! - After `shutdown` returns, no reminder is delivered.

use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigError, EngineConfig};
use crate::db::{open_db, open_db_in_memory, DbError};
use crate::index::due_index::DueIndex;
use crate::notify::sink::NotificationSink;
use crate::repo::task_repo::{RepoError, SqliteTaskRepository, TaskRepository};
use crate::service::review_service::ReviewService;
use crate::timer::notification_timer::{NotificationTimer, TimerHandle, TimerState};
use log::info;
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::sync::Arc;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug)]
pub enum EngineError {
    Config(ConfigError),
    Db(DbError),
    Repo(RepoError),
    TimerSpawn(std::io::Error),
}

impl Display for EngineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
            Self::TimerSpawn(err) => write!(f, "failed to start timer thread: {err}"),
        }
    }
}

impl Error for EngineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::Repo(err) => Some(err),
            Self::TimerSpawn(err) => Some(err),
        }
    }
}

impl From<ConfigError> for EngineError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<DbError> for EngineError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<RepoError> for EngineError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

/// Running scheduling engine.
pub struct ReviewEngine {
    service: ReviewService,
    repo: Arc<SqliteTaskRepository>,
    index: Arc<DueIndex>,
    timer: TimerHandle,
}

impl ReviewEngine {
    /// Opens (or creates) a store file and starts the timer on wall-clock time.
    pub fn open(
        path: impl AsRef<Path>,
        config: EngineConfig,
        sink: Arc<dyn NotificationSink>,
    ) -> EngineResult<Self> {
        let conn = open_db(path)?;
        Self::start(conn, config, sink, Arc::new(SystemClock))
    }

    /// Starts an engine over a throwaway in-memory store.
    pub fn open_in_memory(
        config: EngineConfig,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
    ) -> EngineResult<Self> {
        let conn = open_db_in_memory()?;
        Self::start(conn, config, sink, clock)
    }

    /// Starts an engine over an already migrated connection.
    pub fn start(
        conn: Connection,
        config: EngineConfig,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
    ) -> EngineResult<Self> {
        config.validate()?;
        let repo = Arc::new(SqliteTaskRepository::new(
            conn,
            config.scheduler,
            Arc::clone(&clock),
        ));
        let store: Arc<dyn TaskRepository> = repo.clone();

        let index = Arc::new(DueIndex::new());
        let entries = index.rebuild_from_store(store.as_ref())?;

        let timer = NotificationTimer::new(
            Arc::clone(&store),
            Arc::clone(&index),
            sink,
            Arc::clone(&clock),
            config.timer,
        );
        let service = ReviewService::new(store, Arc::clone(&index), clock, Some(timer.waker()))
            .with_write_gate(timer.write_gate());
        let timer = timer.spawn().map_err(EngineError::TimerSpawn)?;

        info!("event=engine_start module=engine status=ok entries={entries}");
        Ok(Self {
            service,
            repo,
            index,
            timer,
        })
    }

    pub fn service(&self) -> &ReviewService {
        &self.service
    }

    pub fn index(&self) -> &DueIndex {
        &self.index
    }

    pub fn timer_state(&self) -> TimerState {
        self.timer.state()
    }

    pub fn timer_cycles(&self) -> u64 {
        self.timer.completed_cycles()
    }

    /// Forces the timer to re-check due tasks now.
    pub fn wake_timer(&self) {
        self.timer.wake();
    }

    /// Stops the timer (letting an in-flight firing finish), flushes and
    /// closes the store.
    pub fn shutdown(self) -> EngineResult<()> {
        let Self {
            service,
            repo,
            index,
            mut timer,
        } = self;

        timer.shutdown();
        drop(timer);
        drop(service);
        drop(index);

        repo.flush()?;
        match Arc::try_unwrap(repo) {
            Ok(repo) => repo.close()?,
            // Outstanding clone; the connection closes when it drops.
            Err(_) => info!("event=engine_stop module=engine status=deferred_close"),
        }
        info!("event=engine_stop module=engine status=ok");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{EngineError, ReviewEngine};
    use crate::clock::ManualClock;
    use crate::config::EngineConfig;
    use crate::notify::sink::LogSink;
    use std::sync::Arc;

    #[test]
    fn invalid_config_is_rejected_before_the_timer_starts() {
        let mut config = EngineConfig::default();
        config.timer.dedup_window_ms = 0;

        let result =
            ReviewEngine::open_in_memory(config, Arc::new(LogSink), Arc::new(ManualClock::new(0)));
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[test]
    fn shutdown_stops_the_timer_and_closes_the_store() {
        let engine = ReviewEngine::open_in_memory(
            EngineConfig::default(),
            Arc::new(LogSink),
            Arc::new(ManualClock::new(1_700_000_000_000)),
        )
        .unwrap();
        engine.service().create_task("Lifetimes", None).unwrap();
        assert_eq!(engine.index().len().unwrap(), 1);

        engine.shutdown().unwrap();
    }
}
