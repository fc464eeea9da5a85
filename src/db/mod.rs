//! SQLite-backed store for opportunities, staff accounts and sessions.
//!
//! The database lives at `~/.kobber/kobber.db` unless the config points
//! elsewhere (see `Config::database_path`). It is the only copy of the lead history; back it up with
//! `db_backup::backup_database`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::Connection;

pub mod opportunities;
pub mod types;
pub mod users;

pub use types::*;

pub struct LeadDb {
    conn: Connection,
}

impl LeadDb {
    /// Borrow the underlying connection for ad-hoc queries.
    pub fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    /// Execute a closure within a SQLite transaction.
    /// Commits on Ok, rolls back on Err.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T, DbError>
    where
        F: FnOnce(&Self) -> Result<T, DbError>,
    {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        match f(self) {
            Ok(val) => {
                self.conn.execute_batch("COMMIT")?;
                Ok(val)
            }
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    /// Open a database at an explicit path and bring its schema up to date.
    pub fn open_at(path: PathBuf) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(&path)?;

        // WAL so the live-query task can read while a command writes
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        crate::migrations::run_migrations(&conn).map_err(DbError::Migration)?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        log::debug!("Opened lead database at {}", path.display());
        Ok(Self { conn })
    }

    /// Path of the main database file, if file-backed.
    pub fn path(&self) -> Option<&Path> {
        self.conn.path().filter(|p| !p.is_empty()).map(Path::new)
    }
}

/// Canonical timestamp format for every TEXT time column. Fixed precision and
/// a `Z` suffix keep lexical order equal to chronological order.
pub(crate) fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp inside a row mapper.
pub(crate) fn parse_ts(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Parse a stored enum id inside a row mapper.
pub(crate) fn parse_enum<T>(
    idx: usize,
    value: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    parse(value).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unknown value '{}'", value).into(),
        )
    })
}
