//! Configuration stored at `~/.kobber/config.json`.
//!
//! Every field has a serde default, so an empty object (or a missing file) is
//! a valid configuration. The timezone and classification rules are checked
//! on load; a config that loads is a config the commands can use.

use std::path::{Path, PathBuf};

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::classify::{ClassificationConfig, Classifier, ClassifyError};

pub const CONFIG_ENV: &str = "KOBBER_CONFIG";
pub const MAX_SESSION_TTL_DAYS: i64 = 365;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not find home directory")]
    HomeDirNotFound,

    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Failed to write config: {0}")]
    Write(std::io::Error),

    #[error("Unknown timezone '{0}'")]
    InvalidTimezone(String),

    #[error("sessionTtlDays must be between 1 and {max}, got {0}", max = MAX_SESSION_TTL_DAYS)]
    SessionTtl(i64),

    #[error(transparent)]
    Classification(#[from] ClassifyError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Emails allowed to edit, delete, see the dashboard and export.
    #[serde(default)]
    pub admin_emails: Vec<String>,
    /// Database file; defaults to `~/.kobber/kobber.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<String>,
    /// IANA zone used for month bucketing and export dates.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_recent_limit")]
    pub recent_limit: usize,
    #[serde(default = "default_lookup_debounce_ms")]
    pub lookup_debounce_ms: u64,
    #[serde(default = "default_session_ttl_days")]
    pub session_ttl_days: i64,
    #[serde(default)]
    pub classification: ClassificationConfig,
    /// Shown in the PDF report header.
    #[serde(default = "default_company_name")]
    pub company_name: String,
}

fn default_timezone() -> String {
    "America/Sao_Paulo".to_string()
}

fn default_recent_limit() -> usize {
    5
}

fn default_lookup_debounce_ms() -> u64 {
    800
}

fn default_session_ttl_days() -> i64 {
    30
}

fn default_company_name() -> String {
    "Kobber Autopeças".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            admin_emails: Vec::new(),
            database_path: None,
            timezone: default_timezone(),
            recent_limit: default_recent_limit(),
            lookup_debounce_ms: default_lookup_debounce_ms(),
            session_ttl_days: default_session_ttl_days(),
            classification: ClassificationConfig::default(),
            company_name: default_company_name(),
        }
    }
}

impl Config {
    pub fn tz(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::InvalidTimezone(self.timezone.clone()))
    }

    pub fn classifier(&self) -> Result<Classifier, ConfigError> {
        Ok(Classifier::new(&self.classification)?)
    }

    /// Resolve the database file path.
    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.database_path {
            Some(path) if !path.trim().is_empty() => Ok(crate::util::expand_home(path.trim())),
            _ => Ok(kobber_dir()?.join("kobber.db")),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.tz()?;
        self.classifier()?;
        if !(1..=MAX_SESSION_TTL_DAYS).contains(&self.session_ttl_days) {
            return Err(ConfigError::SessionTtl(self.session_ttl_days));
        }
        Ok(())
    }
}

/// The state directory (`~/.kobber`).
pub fn kobber_dir() -> Result<PathBuf, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::HomeDirNotFound)?;
    Ok(home.join(".kobber"))
}

/// Get the config file path: `$KOBBER_CONFIG` if set, else `~/.kobber/config.json`.
pub fn config_path() -> Result<PathBuf, ConfigError> {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        if !path.trim().is_empty() {
            return Ok(crate::util::expand_home(path.trim()));
        }
    }
    Ok(kobber_dir()?.join("config.json"))
}

/// Load and validate the config. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        log::info!("No config at {}, using defaults", path.display());
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config: Config = serde_json::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

/// Validate and write the config atomically.
pub fn save_config(path: &Path, config: &Config) -> Result<(), ConfigError> {
    config.validate()?;
    let content = serde_json::to_string_pretty(config)?;
    crate::util::atomic_write_str(path, &content).map_err(ConfigError::Write)?;
    log::info!("Saved config to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.recent_limit, 5);
        assert_eq!(config.lookup_debounce_ms, 800);
        assert_eq!(config.tz().unwrap(), chrono_tz::America::Sao_Paulo);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"adminEmails":["gerente@kobber.com.br"],"recentLimit":10}"#,
        )
        .unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.admin_emails, vec!["gerente@kobber.com.br"]);
        assert_eq!(config.recent_limit, 10);
        assert_eq!(config.session_ttl_days, 30);
    }

    #[test]
    fn test_invalid_timezone_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"timezone":"Mars/Olympus"}"#).unwrap();
        assert!(matches!(
            load_config(&path),
            Err(ConfigError::InvalidTimezone(_))
        ));
    }

    #[test]
    fn test_invalid_rule_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"classification":{"rules":[{"bucket":"online","field":"notes","pattern":"[x"}]}}"#,
        )
        .unwrap();
        assert!(matches!(
            load_config(&path),
            Err(ConfigError::Classification(_))
        ));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = Config {
            admin_emails: vec!["gerente@kobber.com.br".into()],
            database_path: Some("/tmp/kobber-test.db".into()),
            ..Config::default()
        };
        save_config(&path, &config).unwrap();
        assert_eq!(load_config(&path).unwrap(), config);
        assert_eq!(
            config.database_path().unwrap(),
            PathBuf::from("/tmp/kobber-test.db")
        );
    }

    #[test]
    fn test_session_ttl_out_of_range_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        for ttl in [0, -3, 200_000_000] {
            std::fs::write(&path, format!(r#"{{"sessionTtlDays":{}}}"#, ttl)).unwrap();
            let err = load_config(&path).unwrap_err();
            assert!(matches!(err, ConfigError::SessionTtl(value) if value == ttl));
        }

        std::fs::write(&path, r#"{"sessionTtlDays":365}"#).unwrap();
        assert_eq!(load_config(&path).unwrap().session_ttl_days, 365);
    }
}
