use std::path::PathBuf;
use std::sync::Mutex;

use crate::auth::{LoginThrottle, SessionManager};
use crate::config::{save_config, Config};
use crate::db::{DbError, LeadDb};
use crate::error::CrmError;
use crate::live::ChangeFeed;

/// Everything a command needs, shared behind an `Arc` by the front end.
pub struct AppState {
    pub config: Mutex<Config>,
    pub config_path: PathBuf,
    pub db: Mutex<LeadDb>,
    pub sessions: SessionManager,
    pub changes: ChangeFeed,
    pub throttle: LoginThrottle,
}

impl AppState {
    /// Open the configured database and build the shared state.
    pub fn open(config: Config, config_path: PathBuf) -> Result<Self, CrmError> {
        let db = LeadDb::open_at(config.database_path()?)?;
        Ok(Self::from_db(config, config_path, db))
    }

    /// Build the state around an already open database.
    pub fn from_db(config: Config, config_path: PathBuf, db: LeadDb) -> Self {
        Self {
            config: Mutex::new(config),
            config_path,
            db: Mutex::new(db),
            sessions: SessionManager::new(),
            changes: ChangeFeed::default(),
            throttle: LoginThrottle::default(),
        }
    }

    /// Snapshot of the current config.
    pub fn config(&self) -> Result<Config, CrmError> {
        Ok(self.config.lock()?.clone())
    }

    /// Run a closure against the database while holding its lock.
    pub fn with_db<T>(&self, f: impl FnOnce(&LeadDb) -> Result<T, DbError>) -> Result<T, CrmError> {
        let db = self.db.lock()?;
        Ok(f(&db)?)
    }
}

/// Apply a mutation to the config, persist it atomically and update the
/// in-memory copy. Nothing changes if the mutated config fails validation.
pub fn create_or_update_config(
    state: &AppState,
    mutator: impl FnOnce(&mut Config),
) -> Result<Config, CrmError> {
    let mut guard = state.config.lock()?;
    let mut config = guard.clone();
    mutator(&mut config);
    save_config(&state.config_path, &config)?;
    *guard = config.clone();
    Ok(config)
}

#[cfg(test)]
pub mod test_state {
    use std::sync::Arc;

    use super::AppState;
    use crate::config::Config;
    use crate::db::test_utils::test_db;

    pub const ADMIN: &str = "gerente@kobber.com.br";

    /// State over a throwaway database with one admin on the allow-list.
    pub fn test_state() -> Arc<AppState> {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config_path = dir.path().join("config.json");
        std::mem::forget(dir);
        let config = Config {
            admin_emails: vec![ADMIN.to_string()],
            ..Config::default()
        };
        Arc::new(AppState::from_db(config, config_path, test_db()))
    }
}
