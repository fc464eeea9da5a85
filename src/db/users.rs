use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use super::*;

impl LeadDb {
    // =========================================================================
    // Staff accounts
    // =========================================================================

    /// Create a staff account. The email must be unique (case-insensitive).
    pub fn create_user(
        &self,
        email: &str,
        display_name: Option<&str>,
        password_hash: &str,
        password_salt: &str,
        password_iterations: u32,
        now: DateTime<Utc>,
    ) -> Result<DbUser, DbError> {
        let email = email.trim().to_lowercase();
        if self.get_user_by_email(&email)?.is_some() {
            return Err(DbError::Duplicate(email));
        }

        let id = Uuid::new_v4().to_string();
        let ts = format_ts(&now);
        self.conn.execute(
            "INSERT INTO users (id, email, display_name, password_hash, password_salt,
                password_iterations, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                id,
                email,
                display_name,
                password_hash,
                password_salt,
                password_iterations,
                ts
            ],
        )?;

        self.get_user(&id)?.ok_or(DbError::NotFound(id))
    }

    pub fn get_user(&self, id: &str) -> Result<Option<DbUser>, DbError> {
        let user = self
            .conn
            .query_row(
                "SELECT id, email, display_name, password_hash, password_salt,
                        password_iterations, created_at, updated_at
                 FROM users WHERE id = ?1",
                params![id],
                Self::map_user_row,
            )
            .optional()?;
        Ok(user)
    }

    /// Look up a staff account by email (case-insensitive).
    pub fn get_user_by_email(&self, email: &str) -> Result<Option<DbUser>, DbError> {
        let user = self
            .conn
            .query_row(
                "SELECT id, email, display_name, password_hash, password_salt,
                        password_iterations, created_at, updated_at
                 FROM users WHERE email = ?1 COLLATE NOCASE",
                params![email.trim()],
                Self::map_user_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn list_users(&self) -> Result<Vec<DbUser>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, email, display_name, password_hash, password_salt,
                    password_iterations, created_at, updated_at
             FROM users ORDER BY email",
        )?;
        let rows = stmt.query_map([], Self::map_user_row)?;
        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    /// Replace a user's password material and drop their open sessions.
    pub fn set_password(
        &self,
        user_id: &str,
        password_hash: &str,
        password_salt: &str,
        password_iterations: u32,
        now: DateTime<Utc>,
    ) -> Result<(), DbError> {
        self.with_transaction(|db| {
            let changed = db.conn.execute(
                "UPDATE users SET password_hash = ?2, password_salt = ?3,
                    password_iterations = ?4, updated_at = ?5
                 WHERE id = ?1",
                params![
                    user_id,
                    password_hash,
                    password_salt,
                    password_iterations,
                    format_ts(&now)
                ],
            )?;
            if changed == 0 {
                return Err(DbError::NotFound(user_id.to_string()));
            }
            db.conn
                .execute("DELETE FROM sessions WHERE user_id = ?1", params![user_id])?;
            Ok(())
        })
    }

    fn map_user_row(row: &Row<'_>) -> rusqlite::Result<DbUser> {
        Ok(DbUser {
            id: row.get(0)?,
            email: row.get(1)?,
            display_name: row.get(2)?,
            password_hash: row.get(3)?,
            password_salt: row.get(4)?,
            password_iterations: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    pub fn insert_session(
        &self,
        token: &str,
        user_id: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO sessions (token, user_id, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![token, user_id, format_ts(&now), format_ts(&expires_at)],
        )?;
        Ok(())
    }

    pub fn get_session(&self, token: &str) -> Result<Option<DbSession>, DbError> {
        let session = self
            .conn
            .query_row(
                "SELECT s.token, s.user_id, u.email, s.created_at, s.expires_at
                 FROM sessions s
                 JOIN users u ON u.id = s.user_id
                 WHERE s.token = ?1",
                params![token],
                |row| {
                    Ok(DbSession {
                        token: row.get(0)?,
                        user_id: row.get(1)?,
                        email: row.get(2)?,
                        created_at: row.get(3)?,
                        expires_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(session)
    }

    pub fn delete_session(&self, token: &str) -> Result<bool, DbError> {
        let deleted = self
            .conn
            .execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
        Ok(deleted > 0)
    }

    /// Remove sessions that expired before `now`. Returns how many were purged.
    pub fn purge_expired_sessions(&self, now: DateTime<Utc>) -> Result<usize, DbError> {
        let purged = self.conn.execute(
            "DELETE FROM sessions WHERE expires_at < ?1",
            params![format_ts(&now)],
        )?;
        Ok(purged)
    }

    // =========================================================================
    // Sign-in failures
    // =========================================================================

    /// Record a failed sign-in for `email` and drop every record (for any
    /// email) older than `forget_before`.
    pub fn record_login_failure(
        &self,
        email: &str,
        now: DateTime<Utc>,
        forget_before: DateTime<Utc>,
    ) -> Result<(), DbError> {
        self.with_transaction(|db| {
            db.conn.execute(
                "DELETE FROM login_failures WHERE failed_at < ?1",
                params![format_ts(&forget_before)],
            )?;
            db.conn.execute(
                "INSERT INTO login_failures (email, failed_at) VALUES (?1, ?2)",
                params![email.trim().to_lowercase(), format_ts(&now)],
            )?;
            Ok(())
        })
    }

    /// Failures for `email` strictly after `since`, oldest first.
    pub fn login_failures_after(
        &self,
        email: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT failed_at FROM login_failures
             WHERE email = ?1 COLLATE NOCASE AND failed_at > ?2
             ORDER BY failed_at",
        )?;
        let rows = stmt.query_map(params![email.trim(), format_ts(&since)], |row| {
            let value: String = row.get(0)?;
            parse_ts(0, &value)
        })?;
        let mut failures = Vec::new();
        for row in rows {
            failures.push(row?);
        }
        Ok(failures)
    }

    pub fn clear_login_failures(&self, email: &str) -> Result<(), DbError> {
        self.conn.execute(
            "DELETE FROM login_failures WHERE email = ?1 COLLATE NOCASE",
            params![email.trim()],
        )?;
        Ok(())
    }
}
