//! Schema scripts for the review store.
//!
//! # Invariants
//! - Script `n` (1-based position in `SCRIPTS`) moves the schema from
//!   version `n - 1` to `n`; scripts are append-only.
//! - The reached version is stored in `PRAGMA user_version` inside the same
//!   transaction as the scripts, so a failed upgrade leaves the old version.

use crate::db::{DbError, DbResult};
use log::info;
use rusqlite::{Connection, TransactionBehavior};

const SCRIPTS: &[&str] = &[include_str!("0001_init.sql")];

/// Schema version this binary creates and understands.
pub fn latest_version() -> u32 {
    u32::try_from(SCRIPTS.len()).unwrap_or(u32::MAX)
}

/// Reads the schema version recorded in the database file.
pub fn schema_version(conn: &Connection) -> DbResult<u32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

/// Brings the schema up to `latest_version()`.
///
/// Returns the number of scripts applied (0 when already current).
pub fn apply_migrations(conn: &mut Connection) -> DbResult<u32> {
    let found = schema_version(conn)?;
    let supported = latest_version();
    if found > supported {
        return Err(DbError::SchemaTooNew { found, supported });
    }
    if found == supported {
        return Ok(0);
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    for (version, script) in (1..=supported).zip(SCRIPTS).skip(found as usize) {
        tx.execute_batch(script)
            .map_err(|source| DbError::Migration { version, source })?;
    }
    tx.pragma_update(None, "user_version", supported)?;
    tx.commit()?;

    info!(
        "event=db_migrate module=db status=ok from_version={found} to_version={supported}"
    );
    Ok(supported - found)
}
