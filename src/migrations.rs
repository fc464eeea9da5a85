//! Versioned schema upgrades for the lead database.
//!
//! Every file under `migrations/` is compiled into the binary and stamped
//! into `schema_version` once applied. A migration and its stamp commit
//! together, so a crash mid-upgrade leaves the previous version intact.

use rusqlite::Connection;

struct Migration {
    version: i32,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        sql: include_str!("migrations/001_baseline.sql"),
    },
    Migration {
        version: 2,
        sql: include_str!("migrations/002_payment_channel.sql"),
    },
    Migration {
        version: 3,
        sql: include_str!("migrations/003_login_failures.sql"),
    },
];

/// Latest version this build knows how to produce.
fn latest_version() -> i32 {
    MIGRATIONS.iter().map(|m| m.version).max().unwrap_or(0)
}

/// Version stamped on the database, creating the bookkeeping table on first use.
fn applied_version(conn: &Connection) -> Result<i32, String> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| format!("Cannot create schema_version: {}", e))?;

    conn.query_row("SELECT IFNULL(MAX(version), 0) FROM schema_version", [], |row| {
        row.get(0)
    })
    .map_err(|e| format!("Cannot read schema_version: {}", e))
}

/// Copy a populated, file-backed database to `<db>.pre-migration.bak` so an
/// upgrade that goes wrong can be rolled back by hand.
fn snapshot_before_upgrade(conn: &Connection, from_version: i32) -> Result<(), String> {
    if from_version == 0 {
        return Ok(());
    }
    let Some(db_path) = conn.path().filter(|p| !p.is_empty()) else {
        return Ok(());
    };

    let snapshot = format!("{}.pre-migration.bak", db_path);
    let mut target =
        Connection::open(&snapshot).map_err(|e| format!("Cannot open {}: {}", snapshot, e))?;
    rusqlite::backup::Backup::new(conn, &mut target)
        .and_then(|backup| backup.step(-1).map(|_| ()))
        .map_err(|e| format!("Snapshot before v{} upgrade failed: {}", from_version, e))?;

    log::info!("Saved schema v{} snapshot to {}", from_version, snapshot);
    Ok(())
}

fn apply(conn: &Connection, migration: &Migration) -> Result<(), String> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| format!("Cannot start v{} upgrade: {}", migration.version, e))?;
    tx.execute_batch(migration.sql)
        .map_err(|e| format!("Migration v{} failed: {}", migration.version, e))?;
    tx.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [migration.version],
    )
    .map_err(|e| format!("Cannot stamp v{}: {}", migration.version, e))?;
    tx.commit()
        .map_err(|e| format!("Cannot commit v{}: {}", migration.version, e))
}

/// Bring the schema up to the latest version and return how many migrations
/// ran. Databases written by a newer build are left alone and reported.
pub fn run_migrations(conn: &Connection) -> Result<usize, String> {
    let from = applied_version(conn)?;
    let latest = latest_version();
    if from > latest {
        return Err(format!(
            "Database is at schema v{} but this build of Kobber only knows v{}. \
             Install a newer release.",
            from, latest
        ));
    }
    if from == latest {
        return Ok(0);
    }

    snapshot_before_upgrade(conn, from)?;

    let mut ran = 0;
    for migration in MIGRATIONS.iter().filter(|m| m.version > from) {
        apply(conn, migration)?;
        log::info!("Schema upgraded to v{}", migration.version);
        ran += 1;
    }
    Ok(ran)
}
