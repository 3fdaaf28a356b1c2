//! Operator CLI for the Recall review store.
//!
//! # Responsibility
//! - Drive the same create/list/review/delete boundary the UI uses.
//! - Provide a foreground `watch` mode that prints due reminders.

use clap::{Parser, Subcommand};
use recall_core::db::{open_db, DbError};
use recall_core::{
    init_stderr_logging, Clock, ConfigError, DeliveryError, DueIndex, DueNotice, EngineConfig,
    EngineError, NotificationSink, RepoError, ReviewEngine, ReviewService, SqliteTaskRepository,
    SystemClock, Task, TaskId, TaskPatch, TaskRepository, TaskSummary,
};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "recall", about = "Spaced-repetition review tracker", version)]
struct Cli {
    /// SQLite database file
    #[arg(long, global = true, default_value = "recall.sqlite3")]
    db: PathBuf,

    /// JSON engine config (scheduler and timer tuning)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level written to stderr
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Add a task to review
    Add {
        name: String,
        #[arg(long)]
        description: Option<String>,
    },

    /// List tasks by next review time
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show one task
    Show { id: TaskId },

    /// Change a task's name
    Rename { id: TaskId, name: String },

    /// Record a review (defaults to now)
    Review {
        id: TaskId,
        /// Review time in Unix epoch milliseconds
        #[arg(long)]
        at: Option<i64>,
    },

    /// Show a task's review history
    History { id: TaskId },

    /// Delete a task and its history
    Delete { id: TaskId },

    /// List tasks due now
    Due,

    /// Stay in the foreground and print reminders as tasks come due
    Watch {
        /// Stop after this many seconds
        #[arg(long)]
        seconds: Option<u64>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = init_stderr_logging(&cli.log_level) {
        eprintln!("recall: {err}");
        return ExitCode::FAILURE;
    }
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("recall: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    if let Command::Watch { seconds } = cli.command {
        return watch(&cli.db, config, seconds);
    }

    let service = open_service(&cli.db, config)?;
    let now = SystemClock.now_ms();
    match cli.command {
        Command::Add { name, description } => {
            let task = service.create_task(&name, description.as_deref())?;
            println!("{}", task.id);
        }
        Command::List { json } => {
            let summaries = service.list_tasks()?;
            if json {
                let rendered = serde_json::to_string_pretty(&summaries)
                    .map_err(|err| CliError::Output(err.to_string()))?;
                println!("{rendered}");
            } else {
                print_table(&summaries, now);
            }
        }
        Command::Show { id } => print_task(&service.get_task(id)?, now),
        Command::Rename { id, name } => {
            let task = service.update_task(id, &TaskPatch::rename(name))?;
            print_task(&task, now);
        }
        Command::Review { id, at } => {
            let task = service.submit_review(id, at)?;
            println!(
                "reviewed {} ({} total); next review {}",
                task.id,
                task.review_count,
                describe_due(task.next_due_at, now)
            );
        }
        Command::History { id } => {
            for event in service.review_history(id)? {
                println!(
                    "#{:<3} at {}  interval {} -> {}",
                    event.sequence,
                    event.reviewed_at,
                    describe_span(event.interval_before_ms),
                    describe_span(event.interval_after_ms)
                );
            }
        }
        Command::Delete { id } => {
            service.delete_task(id)?;
            println!("deleted {id}");
        }
        Command::Due => print_table(&service.due_tasks()?, now),
        Command::Watch { .. } => {}
    }
    Ok(())
}

fn open_service(db: &Path, config: EngineConfig) -> Result<ReviewService, CliError> {
    let conn = open_db(db)?;
    let clock = Arc::new(SystemClock);
    let repo: Arc<dyn TaskRepository> =
        Arc::new(SqliteTaskRepository::new(conn, config.scheduler, clock.clone()));
    let index = Arc::new(DueIndex::new());
    index.rebuild_from_store(repo.as_ref())?;
    Ok(ReviewService::new(repo, index, clock, None))
}

/// Prints each reminder as one terminal line.
struct TerminalSink;

impl NotificationSink for TerminalSink {
    fn deliver(&self, notice: &DueNotice) -> Result<(), DeliveryError> {
        println!("due: {}  {}", notice.task_id, notice.task_name);
        Ok(())
    }
}

fn watch(db: &Path, config: EngineConfig, seconds: Option<u64>) -> Result<(), CliError> {
    let engine = ReviewEngine::open(db, config, Arc::new(TerminalSink))?;
    let tasks = engine.index().len().unwrap_or(0);
    log::info!("event=cli_watch module=cli status=start entries={tasks} seconds={seconds:?}");
    eprintln!("watching {tasks} task(s) in {}", db.display());

    let (stop_tx, stop_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })
    .map_err(|err| CliError::Signal(err.to_string()))?;

    let interrupted = wait_for_stop(&stop_rx, seconds.map(Duration::from_secs));
    log::info!("event=cli_watch module=cli status=stopping interrupted={interrupted}");
    engine.shutdown()?;
    Ok(())
}

/// Blocks until a stop arrives on `stop` or `limit` elapses.
/// Returns true when stopped by signal.
fn wait_for_stop(stop: &Receiver<()>, limit: Option<Duration>) -> bool {
    match limit {
        Some(limit) => stop.recv_timeout(limit).is_ok(),
        None => stop.recv().is_ok(),
    }
}

fn print_table(summaries: &[TaskSummary], now: i64) {
    if summaries.is_empty() {
        println!("no tasks");
        return;
    }
    println!("{:<36}  {:>8}  {:<20}  name", "id", "repeated", "near repetition");
    for summary in summaries {
        println!(
            "{:<36}  {:>8}  {:<20}  {}",
            summary.id,
            summary.review_count,
            describe_due(summary.next_due_at, now),
            summary.name
        );
    }
}

fn print_task(task: &Task, now: i64) {
    println!("id:          {}", task.id);
    println!("name:        {}", task.name);
    if let Some(description) = &task.description {
        println!("description: {description}");
    }
    println!("created:     {}", task.created_at);
    println!("reviews:     {}", task.review_count);
    println!("interval:    {}", describe_span(task.current_interval_ms));
    println!("next review: {}", describe_due(task.next_due_at, now));
}

fn describe_due(due_at: i64, now: i64) -> String {
    if due_at <= now {
        let late = now - due_at;
        if late < 60_000 {
            "due now".to_string()
        } else {
            format!("overdue {}", describe_span(late))
        }
    } else {
        format!("in {}", describe_span(due_at - now))
    }
}

fn describe_span(ms: i64) -> String {
    let minutes = ms / 60_000;
    let (days, hours, minutes) = (minutes / 1_440, (minutes / 60) % 24, minutes % 60);
    match (days, hours) {
        (0, 0) => format!("{minutes}m"),
        (0, _) => format!("{hours}h {minutes}m"),
        _ => format!("{days}d {hours}h"),
    }
}

#[derive(Debug)]
enum CliError {
    Config(ConfigError),
    Db(DbError),
    Repo(RepoError),
    Engine(EngineError),
    Signal(String),
    Output(String),
}

impl Display for CliError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(err) => write!(f, "config: {err}"),
            Self::Db(err) => write!(f, "database: {err}"),
            Self::Repo(err) => write!(f, "{err}"),
            Self::Engine(err) => write!(f, "engine: {err}"),
            Self::Signal(message) => write!(f, "signal handler: {message}"),
            Self::Output(message) => write!(f, "output: {message}"),
        }
    }
}

impl Error for CliError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::Repo(err) => Some(err),
            Self::Engine(err) => Some(err),
            Self::Signal(_) | Self::Output(_) => None,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

impl From<DbError> for CliError {
    fn from(err: DbError) -> Self {
        Self::Db(err)
    }
}

impl From<RepoError> for CliError {
    fn from(err: RepoError) -> Self {
        Self::Repo(err)
    }
}

impl From<EngineError> for CliError {
    fn from(err: EngineError) -> Self {
        Self::Engine(err)
    }
}
