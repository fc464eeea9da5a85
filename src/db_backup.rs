//! SQLite hot backup of the lead database.
//!
//! Uses `rusqlite::backup::Backup` so the source database stays open and in
//! use while the copy is taken.

use std::path::{Path, PathBuf};

use crate::db::{DbError, LeadDb};

/// Default backup location: next to the live database, `<db>.bak`.
pub fn default_backup_path(db: &LeadDb) -> Option<PathBuf> {
    db.path().map(|p| {
        let mut name = p.as_os_str().to_owned();
        name.push(".bak");
        PathBuf::from(name)
    })
}

/// Back up the live database to `dest`, replacing any previous backup there.
/// Returns the backup path on success.
pub fn backup_database(db: &LeadDb, dest: &Path) -> Result<PathBuf, DbError> {
    if let Some(parent) = dest.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
        }
    }

    let mut backup_conn = rusqlite::Connection::open(dest)?;
    let backup = rusqlite::backup::Backup::new(db.conn_ref(), &mut backup_conn)?;

    // Copy all pages in one step (lead history stays small)
    backup.step(-1)?;

    log::info!("Database backed up to {}", dest.display());
    Ok(dest.to_path_buf())
}
