//! Staff sign-in, password hashing and sessions.
//!
//! Passwords are stored as PBKDF2-HMAC-SHA256 digests with a per-user salt.
//! A successful sign-in hands out an opaque session token that the front end
//! keeps and presents again on the next start. The `SessionManager` is the
//! single source of truth for "who is signed in right now"; every sign-in and
//! sign-out replaces its value wholesale and notifies subscribers.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use pbkdf2::pbkdf2_hmac;
use serde::Serialize;
use sha2::Sha256;
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

use crate::config::MAX_SESSION_TTL_DAYS;
use crate::db::{DbError, DbSession, DbUser, LeadDb};
use crate::error::CrmError;

pub const PBKDF2_ITERATIONS: u32 = 200_000;
pub const MAX_FAILED_ATTEMPTS: usize = 5;
pub const THROTTLE_WINDOW_MINUTES: i64 = 15;
const KEY_LEN: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Incorrect email or password.")]
    InvalidCredential,

    #[error("Too many failed attempts. Try again in {retry_after_minutes} minutes.")]
    TooManyAttempts { retry_after_minutes: i64 },

    #[error("Session expired. Sign in again.")]
    SessionExpired,

    #[error("Password must not be empty")]
    EmptyPassword,
}

/// Password material as stored in the `users` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordHash {
    pub hash: String,
    pub salt: String,
    pub iterations: u32,
}

/// Hash a password with a fresh random salt.
pub fn hash_password(password: &str, iterations: u32) -> Result<PasswordHash, AuthError> {
    if password.is_empty() {
        return Err(AuthError::EmptyPassword);
    }
    let salt = *Uuid::new_v4().as_bytes();
    let key = derive_key(password, &salt, iterations);
    Ok(PasswordHash {
        hash: B64.encode(key),
        salt: B64.encode(salt),
        iterations,
    })
}

/// Check a password against stored material. Malformed material never matches.
pub fn verify_password(password: &str, stored: &PasswordHash) -> bool {
    let (Ok(salt), Ok(expected)) = (B64.decode(&stored.salt), B64.decode(&stored.hash)) else {
        return false;
    };
    let key = derive_key(password, &salt, stored.iterations);
    constant_time_eq(&key, &expected)
}

fn derive_key(password: &str, salt: &[u8], iterations: u32) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut key);
    key
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Admin privilege is a static allow-list, compared case-insensitively.
pub fn is_admin(email: &str, admin_emails: &[String]) -> bool {
    let email = email.trim();
    admin_emails
        .iter()
        .any(|admin| admin.trim().eq_ignore_ascii_case(email))
}

// =============================================================================
// Sessions
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub token: String,
    pub user_id: String,
    pub email: String,
    pub is_admin: bool,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    fn from_row(row: DbSession, admin_emails: &[String]) -> Result<Self, AuthError> {
        let expires_at = DateTime::parse_from_rfc3339(&row.expires_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| AuthError::SessionExpired)?;
        Ok(Session {
            is_admin: is_admin(&row.email, admin_emails),
            token: row.token,
            user_id: row.user_id,
            email: row.email,
            expires_at,
        })
    }
}

/// Holds the current session and notifies subscribers on every change.
pub struct SessionManager {
    tx: watch::Sender<Option<Session>>,
}

impl SessionManager {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    pub fn current(&self) -> Option<Session> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.tx.subscribe()
    }

    pub fn set(&self, session: Option<Session>) {
        self.tx.send_replace(session);
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Sign-in throttle: at most `max_failures` failed attempts per email inside
/// a sliding window. Attempts are kept in the database, so every process
/// opened on the same file sees the same count.
#[derive(Debug, Clone, Copy)]
pub struct LoginThrottle {
    max_failures: usize,
    window: Duration,
}

impl Default for LoginThrottle {
    fn default() -> Self {
        Self {
            max_failures: MAX_FAILED_ATTEMPTS,
            window: Duration::minutes(THROTTLE_WINDOW_MINUTES),
        }
    }
}

impl LoginThrottle {
    pub fn check(&self, db: &LeadDb, email: &str, now: DateTime<Utc>) -> Result<(), CrmError> {
        let failures = db.login_failures_after(email, now - self.window)?;
        if failures.len() < self.max_failures {
            return Ok(());
        }
        // Sign-in reopens once enough failures fall out of the window
        let unblocks_at = failures
            .get(failures.len() - self.max_failures)
            .map(|at| *at + self.window)
            .unwrap_or(now);
        let remaining = (unblocks_at - now).num_seconds().max(0);
        Err(AuthError::TooManyAttempts {
            retry_after_minutes: (remaining + 59) / 60,
        }
        .into())
    }

    pub fn record_failure(
        &self,
        db: &LeadDb,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<(), DbError> {
        db.record_login_failure(email, now, now - self.window)
    }

    pub fn clear(&self, db: &LeadDb, email: &str) -> Result<(), DbError> {
        db.clear_login_failures(email)
    }
}

/// Create a staff account with a hashed password.
pub fn register_user(
    db: &LeadDb,
    email: &str,
    display_name: Option<&str>,
    password: &str,
    iterations: u32,
    now: DateTime<Utc>,
) -> Result<DbUser, CrmError> {
    let email = email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(CrmError::InvalidInput(format!("'{}' is not an email", email)));
    }
    let hashed = hash_password(password, iterations)?;
    let user = db.create_user(
        email,
        display_name,
        &hashed.hash,
        &hashed.salt,
        hashed.iterations,
        now,
    )?;
    log::info!("Registered staff account {}", user.email);
    Ok(user)
}

/// Verify credentials and open a new session.
pub fn sign_in(
    db: &LeadDb,
    throttle: &LoginThrottle,
    admin_emails: &[String],
    email: &str,
    password: &str,
    ttl_days: i64,
    now: DateTime<Utc>,
) -> Result<Session, CrmError> {
    throttle.check(db, email, now)?;

    let user = db.get_user_by_email(email)?;
    let verified = user.filter(|u| {
        verify_password(
            password,
            &PasswordHash {
                hash: u.password_hash.clone(),
                salt: u.password_salt.clone(),
                iterations: u.password_iterations,
            },
        )
    });
    let Some(user) = verified else {
        throttle.record_failure(db, email, now)?;
        log::warn!("Failed sign-in for {}", email.trim());
        return Err(AuthError::InvalidCredential.into());
    };
    throttle.clear(db, email)?;

    let expires_at = Duration::try_days(ttl_days.clamp(1, MAX_SESSION_TTL_DAYS))
        .and_then(|ttl| now.checked_add_signed(ttl))
        .ok_or_else(|| {
            CrmError::Internal(format!("Session lifetime of {} days is out of range", ttl_days))
        })?;
    let token = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
    db.insert_session(&token, &user.id, now, expires_at)?;

    log::info!("Signed in {}", user.email);
    Ok(Session {
        token,
        is_admin: is_admin(&user.email, admin_emails),
        user_id: user.id,
        email: user.email,
        expires_at,
    })
}

/// Resume a stored session. Unknown and expired tokens are both rejected.
pub fn restore_session(
    db: &LeadDb,
    admin_emails: &[String],
    token: &str,
    now: DateTime<Utc>,
) -> Result<Session, CrmError> {
    let row = db.get_session(token)?.ok_or(AuthError::SessionExpired)?;
    let session = Session::from_row(row, admin_emails)?;
    if session.expires_at <= now {
        db.delete_session(token)?;
        return Err(AuthError::SessionExpired.into());
    }
    Ok(session)
}

pub fn sign_out(db: &LeadDb, token: &str) -> Result<(), CrmError> {
    if db.delete_session(token)? {
        log::info!("Signed out");
    }
    Ok(())
}
