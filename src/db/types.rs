//! Shared type definitions for the database layer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors specific to database operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Schema migration failed: {0}")]
    Migration(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate record: {0}")]
    Duplicate(String),
}

/// A row from the `users` table. Password material stays in the db layer
/// and the auth module; it is never serialized.
#[derive(Debug, Clone)]
pub struct DbUser {
    pub id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub password_hash: String,
    pub password_salt: String,
    pub password_iterations: u32,
    pub created_at: String,
    pub updated_at: String,
}

/// A row from the `sessions` table joined with its user.
#[derive(Debug, Clone)]
pub struct DbSession {
    pub token: String,
    pub user_id: String,
    pub email: String,
    pub created_at: String,
    pub expires_at: String,
}

/// Parameters for listing opportunities. Results are always newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    /// Cap on returned rows; `None` returns everything.
    #[serde(default)]
    pub limit: Option<usize>,
    /// Exact match on normalized phone digits.
    #[serde(default)]
    pub phone_digits: Option<String>,
}

impl ListQuery {
    pub fn recent(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            phone_digits: None,
        }
    }

    pub fn by_phone(digits: impl Into<String>) -> Self {
        Self {
            limit: None,
            phone_digits: Some(digits.into()),
        }
    }
}
