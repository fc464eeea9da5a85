//! Duplicate-customer lookup while the phone number is being typed.
//!
//! Each keystroke restarts a debounce timer. When the timer fires and the
//! number has enough digits, the store is searched for the most recent prior
//! record with the same digits. Every keystroke also bumps a generation
//! counter and a result is only published while its generation is current,
//! so a slow reply for an older input can never overwrite a newer state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono_tz::Tz;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::db::{DbError, LeadDb};
use crate::phone;
use crate::state::AppState;
use crate::types::Opportunity;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "record", rename_all = "camelCase")]
pub enum LookupState {
    /// Nothing typed yet.
    Idle,
    /// Fewer than the minimum digits; no query is made.
    TooShort,
    /// Waiting for the debounce timer or the query.
    Searching,
    /// The most recent prior record for this number.
    Match(Box<Opportunity>),
    NoMatch,
}

impl LookupState {
    /// One-line message for the phone field, dated in `tz`. `None` while idle.
    pub fn describe(&self, tz: Tz) -> Option<String> {
        match self {
            LookupState::Idle => None,
            LookupState::TooShort => Some(format!(
                "(digite ao menos {} dígitos)",
                phone::LOOKUP_MIN_DIGITS
            )),
            LookupState::Searching => Some("buscando...".to_string()),
            LookupState::NoMatch => Some("Cliente novo".to_string()),
            LookupState::Match(opp) => Some(format!(
                "Cliente já cadastrado: {} ({}), último atendimento {} com {}",
                opp.customer.name,
                opp.customer.city,
                opp.created_at.with_timezone(&tz).format("%d/%m/%Y"),
                opp.salesperson_handle()
            )),
        }
    }
}

/// Synchronous core: look up the latest record for a phone number.
pub fn find_prior_customer(db: &LeadDb, phone_input: &str) -> Result<LookupState, DbError> {
    if !phone::is_lookup_ready(phone_input) {
        return Ok(LookupState::TooShort);
    }
    let digits = phone::digits(phone_input);
    let state = match db.latest_by_phone(&digits)? {
        Some(opp) => {
            log::info!("Lookup: prior customer found for ...{}", tail(&digits));
            LookupState::Match(Box::new(opp))
        }
        None => LookupState::NoMatch,
    };
    Ok(state)
}

/// Last four digits, for logs.
fn tail(digits: &str) -> &str {
    &digits[digits.len().saturating_sub(4)..]
}

/// Debounced lookup bound to one phone input field.
pub struct DuplicateLookup {
    state: Arc<AppState>,
    debounce: Duration,
    generation: Arc<AtomicU64>,
    tx: Arc<watch::Sender<LookupState>>,
    pending: Option<JoinHandle<()>>,
}

impl DuplicateLookup {
    pub fn new(state: Arc<AppState>, debounce: Duration) -> Self {
        let (tx, _rx) = watch::channel(LookupState::Idle);
        Self {
            state,
            debounce,
            generation: Arc::new(AtomicU64::new(0)),
            tx: Arc::new(tx),
            pending: None,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<LookupState> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> LookupState {
        self.tx.borrow().clone()
    }

    /// Feed the latest contents of the phone field.
    ///
    /// Must be called from within a tokio runtime.
    pub fn input(&mut self, phone_input: &str) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }

        if phone::digits(phone_input).is_empty() {
            self.tx.send_replace(LookupState::Idle);
            return;
        }
        if !phone::is_lookup_ready(phone_input) {
            self.tx.send_replace(LookupState::TooShort);
            return;
        }
        self.tx.send_replace(LookupState::Searching);

        let state = self.state.clone();
        let current = self.generation.clone();
        let tx = self.tx.clone();
        let debounce = self.debounce;
        let phone_input = phone_input.to_string();

        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if current.load(Ordering::SeqCst) != generation {
                return;
            }

            let result = match state.db.lock() {
                Ok(db) => find_prior_customer(&db, &phone_input),
                Err(_) => {
                    log::warn!("Lookup: database lock poisoned");
                    return;
                }
            };
            let next = match result {
                Ok(next) => next,
                Err(e) => {
                    log::warn!("Lookup: query failed: {}", e);
                    LookupState::NoMatch
                }
            };

            if current.load(Ordering::SeqCst) == generation {
                tx.send_replace(next);
            } else {
                log::debug!("Lookup: dropped stale result for generation {}", generation);
            }
        }));
    }
}

impl Drop for DuplicateLookup {
    fn drop(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::db::test_utils::test_db;
    use crate::form::test_drafts::{author, loss_draft, sale_draft};
    use crate::state::test_state::test_state;

    const DEBOUNCE: Duration = Duration::from_millis(800);

    fn seed(state: &AppState) {
        let first = loss_draft("Carlos Souza", "(51) 99988-7766", "price")
            .into_new_opportunity(author("ana@kobber.com.br"))
            .unwrap();
        let second = sale_draft("Carlos S.", "51 99988 7766", "250,00")
            .into_new_opportunity(author("bia@kobber.com.br"))
            .unwrap();
        state
            .with_db(|db| {
                db.insert_opportunity(&first, Utc::now())?;
                db.insert_opportunity(&second, Utc::now())
            })
            .unwrap();
    }

    #[test]
    fn test_find_prior_customer_returns_latest() {
        let db = test_db();
        let new = sale_draft("Carlos", "(51) 99988-7766", "10,00")
            .into_new_opportunity(author("ana@kobber.com.br"))
            .unwrap();
        db.insert_opportunity(&new, Utc::now()).unwrap();

        match find_prior_customer(&db, "51999887766").unwrap() {
            LookupState::Match(opp) => assert_eq!(opp.customer.name, "Carlos"),
            other => panic!("expected a match, got {:?}", other),
        }
        assert_eq!(
            find_prior_customer(&db, "51900000000").unwrap(),
            LookupState::NoMatch
        );
        assert_eq!(find_prior_customer(&db, "5199").unwrap(), LookupState::TooShort);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_input_never_queries() {
        let state = test_state();
        let mut lookup = DuplicateLookup::new(state, DEBOUNCE);
        lookup.input("(51) 99");
        assert_eq!(lookup.current(), LookupState::TooShort);
        tokio::time::sleep(DEBOUNCE * 2).await;
        assert_eq!(lookup.current(), LookupState::TooShort);

        lookup.input("");
        assert_eq!(lookup.current(), LookupState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_restarts_on_each_keystroke() {
        let state = test_state();
        seed(&state);
        let mut lookup = DuplicateLookup::new(state, DEBOUNCE);
        let mut rx = lookup.subscribe();

        lookup.input("5199988776");
        tokio::time::advance(Duration::from_millis(500)).await;
        lookup.input("51999887766");
        assert_eq!(lookup.current(), LookupState::Searching);

        // The first timer would have fired here; the restart keeps us waiting
        tokio::time::advance(Duration::from_millis(500)).await;
        tokio::task::yield_now().await;
        assert_eq!(lookup.current(), LookupState::Searching);

        rx.borrow_and_update();
        rx.changed().await.unwrap();
        match rx.borrow().clone() {
            LookupState::Match(opp) => {
                assert_eq!(opp.customer.name, "Carlos S.");
                assert_eq!(opp.salesperson_email, "bia@kobber.com.br");
            }
            other => panic!("expected a match, got {:?}", other),
        };
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_result_does_not_overwrite_newer_input() {
        let state = test_state();
        seed(&state);
        let mut lookup = DuplicateLookup::new(state, DEBOUNCE);

        lookup.input("51999887766");
        tokio::time::advance(DEBOUNCE - Duration::from_millis(1)).await;
        // User keeps typing a different number just before the timer fires
        lookup.input("51911112222");
        tokio::time::sleep(DEBOUNCE * 2).await;

        assert_eq!(lookup.current(), LookupState::NoMatch);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_query_reports_no_match() {
        let state = test_state();
        state
            .with_db(|db| {
                db.conn_ref().execute_batch("DROP TABLE opportunities")?;
                Ok(())
            })
            .unwrap();
        let mut lookup = DuplicateLookup::new(state, DEBOUNCE);
        let mut rx = lookup.subscribe();

        lookup.input("51999887766");
        rx.borrow_and_update();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), LookupState::NoMatch);
    }

    #[test]
    fn test_match_is_dated_in_local_zone() {
        let mut opp = crate::stats::test_records::sale(
            "ana@kobber.com.br",
            "10,00",
            "2026-03-01T01:30:00Z",
        );
        opp.customer.city = "Canoas".to_string();
        let text = LookupState::Match(Box::new(opp))
            .describe(chrono_tz::America::Sao_Paulo)
            .unwrap();
        assert_eq!(
            text,
            "Cliente já cadastrado: Cliente (Canoas), último atendimento 28/02/2026 com ana"
        );
        assert_eq!(LookupState::Idle.describe(chrono_tz::UTC), None);
    }
}
