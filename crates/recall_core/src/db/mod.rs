//! Review store bootstrap: connection setup and schema versioning.
//!
//! # Invariants
//! - No task or review row is read or written before the schema is current.
//! - A database written by a newer binary is refused, never downgraded.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

/// Storage-level failure underneath the task store.
#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    /// The file carries a schema version this binary does not know.
    SchemaTooNew { found: u32, supported: u32 },
    /// A schema script failed; the upgrade was rolled back.
    Migration {
        version: u32,
        source: rusqlite::Error,
    },
    /// A thread panicked while holding the store connection.
    ConnectionPoisoned,
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "sqlite: {err}"),
            Self::SchemaTooNew { found, supported } => write!(
                f,
                "review store schema v{found} was written by a newer version (this build supports up to v{supported})"
            ),
            Self::Migration { version, source } => {
                write!(f, "schema upgrade to v{version} failed: {source}")
            }
            Self::ConnectionPoisoned => f.write_str("review store connection is poisoned"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) | Self::Migration { source: err, .. } => Some(err),
            Self::SchemaTooNew { .. } | Self::ConnectionPoisoned => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
