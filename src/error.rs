//! Error types for the command layer
//!
//! Every layer has its own `thiserror` enum; `CrmError` wraps them so a
//! command can `?` through any of them. Front ends never see `CrmError`
//! directly: it is flattened into a serializable `CommandError` that says
//! whether the failure was an expected credential problem, a permission
//! problem, bad input, a missing record, or something generic.

use thiserror::Error;

use crate::auth::AuthError;
use crate::classify::ClassifyError;
use crate::config::ConfigError;
use crate::db::DbError;
use crate::form::FormError;

/// Top-level error for every command.
#[derive(Debug, Error)]
pub enum CrmError {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Form(#[from] FormError),

    #[error(transparent)]
    Classify(#[from] ClassifyError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Export failed: {0}")]
    Export(String),

    #[error("Sign in to continue")]
    NotSignedIn,

    #[error("Only administrators can {0}")]
    PermissionDenied(&'static str),

    #[error("Opportunity not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CrmError {
    pub fn error_type(&self) -> ErrorType {
        match self {
            CrmError::Auth(_) | CrmError::NotSignedIn => ErrorType::Credential,
            CrmError::PermissionDenied(_) => ErrorType::Permission,
            CrmError::Form(_)
            | CrmError::Classify(_)
            | CrmError::InvalidInput(_)
            | CrmError::Db(DbError::Duplicate(_)) => ErrorType::Validation,
            CrmError::NotFound(_) | CrmError::Db(DbError::NotFound(_)) => ErrorType::NotFound,
            _ => ErrorType::Generic,
        }
    }

    /// Get a user-friendly recovery suggestion
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            CrmError::Auth(AuthError::InvalidCredential) => "Check the email and password.",
            CrmError::Auth(AuthError::TooManyAttempts { .. }) => {
                "Wait a few minutes before trying again."
            }
            CrmError::Auth(_) | CrmError::NotSignedIn => "Run 'kobber login' to sign in.",
            CrmError::PermissionDenied(_) => {
                "Ask an administrator, or add your email to adminEmails in ~/.kobber/config.json"
            }
            CrmError::Form(_) | CrmError::InvalidInput(_) => "Correct the highlighted field.",
            CrmError::Classify(_) | CrmError::Config(_) => {
                "Check your configuration in ~/.kobber/config.json"
            }
            CrmError::NotFound(_) | CrmError::Db(DbError::NotFound(_)) => {
                "The record may have been deleted. Refresh the list."
            }
            CrmError::Db(DbError::Duplicate(_)) => "Use a different email address.",
            CrmError::Db(_) => "Check the database path and disk space.",
            CrmError::Export(_) => "Check that the output folder exists and is writable.",
            CrmError::Internal(_) => "Restart Kobber and try again.",
        }
    }
}

/// Lock helper: a poisoned mutex becomes an internal error instead of a panic.
impl<T> From<std::sync::PoisonError<T>> for CrmError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        CrmError::Internal("Lock poisoned".to_string())
    }
}

/// Serializable error representation for front ends
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandError {
    pub message: String,
    pub error_type: ErrorType,
    pub recovery_suggestion: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorType {
    Credential,
    Permission,
    Validation,
    NotFound,
    Generic,
}

impl From<&CrmError> for CommandError {
    fn from(err: &CrmError) -> Self {
        CommandError {
            message: err.to_string(),
            error_type: err.error_type(),
            recovery_suggestion: err.recovery_suggestion().to_string(),
        }
    }
}

impl From<CrmError> for CommandError {
    fn from(err: CrmError) -> Self {
        CommandError::from(&err)
    }
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}
