use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;

use crate::auth::{self, Session, PBKDF2_ITERATIONS};
use crate::classify::Partition;
use crate::db::ListQuery;
use crate::error::{CommandError, CrmError};
use crate::export::{self, pdf::PdfReport};
use crate::filter::OpportunityFilter;
use crate::form::OpportunityDraft;
use crate::live::{self, ChangeEvent, Snapshot};
use crate::lookup::{self, LookupState};
use crate::state::AppState;
use crate::stats::{self, MonthKey, MonthlySummary};
use crate::types::{Author, Opportunity};

/// Run a command body and flatten its error for the front end.
fn run<T>(name: &str, body: impl FnOnce() -> Result<T, CrmError>) -> Result<T, CommandError> {
    body().map_err(|e| {
        match &e {
            CrmError::Auth(_) | CrmError::NotSignedIn | CrmError::PermissionDenied(_) => {
                log::info!("{}: {}", name, e)
            }
            CrmError::Form(_) | CrmError::InvalidInput(_) | CrmError::NotFound(_) => {
                log::debug!("{}: {}", name, e)
            }
            _ => log::error!("{} failed: {}", name, e),
        }
        CommandError::from(e)
    })
}

/// The signed-in session, dropped if it has expired since sign-in.
fn require_session(state: &AppState) -> Result<Session, CrmError> {
    let session = state.sessions.current().ok_or(CrmError::NotSignedIn)?;
    if session.expires_at <= Utc::now() {
        state.sessions.set(None);
        return Err(auth::AuthError::SessionExpired.into());
    }
    Ok(session)
}

/// Admin rights are re-checked against the live allow-list on every call.
fn require_admin(state: &AppState, action: &'static str) -> Result<Session, CrmError> {
    let session = require_session(state)?;
    let config = state.config()?;
    if !auth::is_admin(&session.email, &config.admin_emails) {
        return Err(CrmError::PermissionDenied(action));
    }
    Ok(session)
}

fn author_of(session: &Session) -> Author {
    Author {
        user_id: session.user_id.clone(),
        email: session.email.clone(),
    }
}

// ── Accounts & sessions ─────────────────────────────────────────────

pub fn sign_in(state: &AppState, email: &str, password: &str) -> Result<Session, CommandError> {
    run("sign_in", || {
        let config = state.config()?;
        let now = Utc::now();
        let session = {
            let db = state.db.lock()?;
            let purged = db.purge_expired_sessions(now)?;
            if purged > 0 {
                log::debug!("Purged {} expired sessions", purged);
            }
            auth::sign_in(
                &db,
                &state.throttle,
                &config.admin_emails,
                email,
                password,
                config.session_ttl_days,
                now,
            )?
        };
        state.sessions.set(Some(session.clone()));
        Ok(session)
    })
}

/// Resume a session from a stored token (e.g. on start-up).
pub fn resume_session(state: &AppState, token: &str) -> Result<Session, CommandError> {
    run("resume_session", || {
        let config = state.config()?;
        let session = {
            let db = state.db.lock()?;
            auth::restore_session(&db, &config.admin_emails, token, Utc::now())?
        };
        state.sessions.set(Some(session.clone()));
        Ok(session)
    })
}

pub fn sign_out(state: &AppState) -> Result<(), CommandError> {
    run("sign_out", || {
        if let Some(session) = state.sessions.current() {
            let db = state.db.lock()?;
            auth::sign_out(&db, &session.token)?;
        }
        state.sessions.set(None);
        Ok(())
    })
}

pub fn current_session(state: &AppState) -> Option<Session> {
    state.sessions.current()
}

/// Create a staff account. Open to anyone while no account exists yet, so the
/// first user can be bootstrapped; admin-only afterwards.
pub fn register_user(
    state: &AppState,
    email: &str,
    display_name: Option<&str>,
    password: &str,
) -> Result<String, CommandError> {
    run("register_user", || {
        let has_users = state.with_db(|db| db.list_users().map(|u| !u.is_empty()))?;
        if has_users {
            require_admin(state, "create staff accounts")?;
        }
        let db = state.db.lock()?;
        let user = auth::register_user(
            &db,
            email,
            display_name,
            password,
            PBKDF2_ITERATIONS,
            Utc::now(),
        )?;
        Ok(user.email)
    })
}

/// Change the signed-in user's password. All of their sessions end.
pub fn change_password(
    state: &AppState,
    current_password: &str,
    new_password: &str,
) -> Result<(), CommandError> {
    run("change_password", || {
        let session = require_session(state)?;
        let db = state.db.lock()?;
        let user = db
            .get_user(&session.user_id)?
            .ok_or(auth::AuthError::SessionExpired)?;
        let stored = auth::PasswordHash {
            hash: user.password_hash,
            salt: user.password_salt,
            iterations: user.password_iterations,
        };
        if !auth::verify_password(current_password, &stored) {
            return Err(auth::AuthError::InvalidCredential.into());
        }
        let hashed = auth::hash_password(new_password, PBKDF2_ITERATIONS)?;
        db.set_password(
            &user.id,
            &hashed.hash,
            &hashed.salt,
            hashed.iterations,
            Utc::now(),
        )?;
        drop(db);
        state.sessions.set(None);
        log::info!("Password changed for {}", user.email);
        Ok(())
    })
}

// ── Opportunities ───────────────────────────────────────────────────

pub fn submit_opportunity(
    state: &AppState,
    draft: OpportunityDraft,
) -> Result<Opportunity, CommandError> {
    run("submit_opportunity", || {
        let session = require_session(state)?;
        let new = draft.into_new_opportunity(author_of(&session))?;
        let opp = state.with_db(|db| db.insert_opportunity(&new, Utc::now()))?;
        log::info!(
            "Opportunity {} recorded by {} ({})",
            opp.id,
            opp.salesperson_email,
            if opp.outcome.is_sale() { "sale" } else { "loss" }
        );
        state.changes.publish(ChangeEvent::Created(opp.id.clone()));
        Ok(opp)
    })
}

pub fn get_recent_opportunities(state: &AppState) -> Result<Vec<Opportunity>, CommandError> {
    run("get_recent_opportunities", || {
        require_session(state)?;
        let limit = state.config()?.recent_limit;
        state.with_db(|db| db.list_opportunities(&ListQuery::recent(limit)))
    })
}

/// Live view of the most recent records. Must be called inside a tokio runtime.
pub fn watch_recent(state: Arc<AppState>) -> Result<watch::Receiver<Snapshot>, CommandError> {
    let limit = run("watch_recent", || {
        require_session(&state)?;
        Ok(state.config()?.recent_limit)
    })?;
    Ok(live::subscribe(state, ListQuery::recent(limit)))
}

pub fn lookup_customer(state: &AppState, phone: &str) -> Result<LookupState, CommandError> {
    run("lookup_customer", || {
        require_session(state)?;
        state.with_db(|db| lookup::find_prior_customer(db, phone))
    })
}

pub fn get_opportunity(state: &AppState, id: &str) -> Result<Opportunity, CommandError> {
    run("get_opportunity", || {
        require_session(state)?;
        state
            .with_db(|db| db.get_opportunity(id))?
            .ok_or_else(|| CrmError::NotFound(id.to_string()))
    })
}

/// Overwrite a record in place. The original author and creation time stay.
pub fn update_opportunity(
    state: &AppState,
    id: &str,
    draft: OpportunityDraft,
) -> Result<Opportunity, CommandError> {
    run("update_opportunity", || {
        let session = require_admin(state, "edit opportunities")?;
        let new = draft.into_new_opportunity(author_of(&session))?;
        let opp = state.with_db(|db| db.update_opportunity(id, &new, Utc::now()))?;
        log::info!("Opportunity {} edited by {}", opp.id, session.email);
        state.changes.publish(ChangeEvent::Updated(opp.id.clone()));
        Ok(opp)
    })
}

pub fn delete_opportunity(state: &AppState, id: &str) -> Result<(), CommandError> {
    run("delete_opportunity", || {
        let session = require_admin(state, "delete opportunities")?;
        if !state.with_db(|db| db.delete_opportunity(id))? {
            return Err(CrmError::NotFound(id.to_string()));
        }
        log::info!("Opportunity {} deleted by {}", id, session.email);
        state.changes.publish(ChangeEvent::Deleted(id.to_string()));
        Ok(())
    })
}

/// Admin table: every record matching the filter, newest first.
pub fn list_opportunities(
    state: &AppState,
    filter: &OpportunityFilter,
) -> Result<Vec<Opportunity>, CommandError> {
    run("list_opportunities", || {
        require_admin(state, "list all opportunities")?;
        filtered(state, filter)
    })
}

fn filtered(state: &AppState, filter: &OpportunityFilter) -> Result<Vec<Opportunity>, CrmError> {
    let config = state.config()?;
    let tz = config.tz()?;
    let classifier = config.classifier()?;
    let records = state.with_db(|db| db.list_opportunities(&ListQuery::default()))?;
    Ok(filter.apply(records, tz, &classifier))
}

// ── Dashboard & exports ─────────────────────────────────────────────

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub summary: MonthlySummary,
    pub partition: Partition,
    pub available_months: Vec<MonthKey>,
}

/// Monthly summary; defaults to the current month in the configured zone.
pub fn get_dashboard(state: &AppState, month: Option<MonthKey>) -> Result<Dashboard, CommandError> {
    run("get_dashboard", || {
        require_admin(state, "view the dashboard")?;
        let config = state.config()?;
        let tz = config.tz()?;
        let classifier = config.classifier()?;
        let month = month.unwrap_or_else(|| MonthKey::current(tz));

        let records = state.with_db(|db| db.list_opportunities(&ListQuery::default()))?;
        let available_months = stats::available_months(&records, tz);
        let in_month = OpportunityFilter::for_month(month).apply(records, tz, &classifier);

        Ok(Dashboard {
            summary: stats::summarize_month(&in_month, month, tz),
            partition: classifier.partition(&in_month),
            available_months,
        })
    })
}

pub fn export_csv(
    state: &AppState,
    filter: &OpportunityFilter,
    dir: &Path,
) -> Result<PathBuf, CommandError> {
    run("export_csv", || {
        require_admin(state, "export data")?;
        let tz = state.config()?.tz()?;
        let records = filtered(state, filter)?;
        let content = export::csv::render_csv(&records, tz);
        let today = Utc::now().with_timezone(&tz).date_naive();
        export::write_export(dir, &export::csv_filename(today), content.as_bytes())
    })
}

pub fn export_pdf(
    state: &AppState,
    month: Option<MonthKey>,
    dir: &Path,
) -> Result<PathBuf, CommandError> {
    run("export_pdf", || {
        require_admin(state, "export data")?;
        let config = state.config()?;
        let tz = config.tz()?;
        let month = month.unwrap_or_else(|| MonthKey::current(tz));
        let records = filtered(state, &OpportunityFilter::for_month(month))?;
        let summary = stats::summarize_month(&records, month, tz);

        let bytes = export::pdf::render_pdf(&PdfReport {
            company_name: &config.company_name,
            month,
            summary: &summary,
            records: &records,
            tz,
            generated_at: Utc::now(),
        });
        export::write_export(dir, &export::pdf_filename(month), &bytes)
    })
}

/// Hot backup to `dest`, or next to the database when no destination is given.
pub fn backup_database(state: &AppState, dest: Option<&Path>) -> Result<PathBuf, CommandError> {
    run("backup_database", || {
        require_admin(state, "back up the database")?;
        let db = state.db.lock()?;
        let dest = match dest {
            Some(path) => path.to_path_buf(),
            None => crate::db_backup::default_backup_path(&db).ok_or_else(|| {
                CrmError::InvalidInput("In-memory database has no backup location".to_string())
            })?,
        };
        Ok(crate::db_backup::backup_database(&db, &dest)?)
    })
}
