//! Live queries over the opportunity store.
//!
//! Writers publish a `ChangeEvent` after every successful insert, update or
//! delete. A live query is a background task that re-runs its `ListQuery`
//! whenever the feed fires and replaces its snapshot wholesale, so readers
//! always see a complete, consistent list rather than incremental patches.
//! Signing out ends every live query, and its receivers see the channel close.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};

use crate::db::ListQuery;
use crate::state::AppState;
use crate::types::Opportunity;

const FEED_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Created(String),
    Updated(String),
    Deleted(String),
}

/// Fan-out of store changes to every live query.
pub struct ChangeFeed {
    tx: broadcast::Sender<ChangeEvent>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish a change. Having no listeners is not an error.
    pub fn publish(&self, event: ChangeEvent) {
        log::debug!("Change feed: {:?}", event);
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(FEED_CAPACITY)
    }
}

/// The full result of a live query at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub records: Vec<Opportunity>,
    /// Bumped on every successful refresh.
    pub version: u64,
}

/// Start a live query. The receiver holds the initial result immediately;
/// the background task stops once every receiver has been dropped or the
/// signed-in user signs out.
///
/// Must be called from within a tokio runtime.
pub fn subscribe(state: Arc<AppState>, query: ListQuery) -> watch::Receiver<Snapshot> {
    // Subscribe before the first read so no change can slip in between
    let mut changes = state.changes.subscribe();
    let mut session = state.sessions.subscribe();

    let initial = match state.with_db(|db| db.list_opportunities(&query)) {
        Ok(records) => Snapshot {
            records,
            version: 1,
        },
        Err(e) => {
            log::warn!("Live query: initial load failed: {}", e);
            Snapshot::default()
        }
    };
    let (tx, rx) = watch::channel(initial);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                signed_in = session.changed() => {
                    if signed_in.is_err() || session.borrow_and_update().is_none() {
                        log::debug!("Live query: session ended");
                        break;
                    }
                    continue;
                }
                event = changes.recv() => match event {
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        log::debug!("Live query: lagged by {} events, refreshing", skipped);
                    }
                    Err(RecvError::Closed) => break,
                },
            }

            match state.with_db(|db| db.list_opportunities(&query)) {
                Ok(records) => {
                    tx.send_modify(|snapshot| {
                        snapshot.records = records;
                        snapshot.version += 1;
                    });
                }
                Err(e) => log::warn!("Live query: refresh failed, keeping last snapshot: {}", e),
            }
        }
        log::debug!("Live query: stopped");
    });

    rx
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::auth::Session;
    use crate::config::Config;
    use crate::db::test_utils::test_db;
    use crate::form::test_drafts::{author, sale_draft};
    use crate::state::test_state::test_state;

    fn insert(state: &AppState, name: &str) -> String {
        let new = sale_draft(name, "51999990000", "10,00")
            .into_new_opportunity(author("ana@kobber.com.br"))
            .unwrap();
        let opp = state
            .with_db(|db| db.insert_opportunity(&new, Utc::now()))
            .unwrap();
        state.changes.publish(ChangeEvent::Created(opp.id.clone()));
        opp.id
    }

    #[tokio::test]
    async fn test_snapshot_follows_changes() {
        let state = test_state();
        insert(&state, "Primeiro");

        let mut rx = subscribe(state.clone(), ListQuery::recent(2));
        assert_eq!(rx.borrow().records.len(), 1);

        insert(&state, "Segundo");
        rx.changed().await.unwrap();
        let names: Vec<String> = rx
            .borrow_and_update()
            .records
            .iter()
            .map(|o| o.customer.name.clone())
            .collect();
        assert_eq!(names, vec!["Segundo", "Primeiro"]);

        // The limit holds as records keep arriving
        insert(&state, "Terceiro");
        rx.changed().await.unwrap();
        let snapshot = rx.borrow_and_update().clone();
        assert_eq!(snapshot.records.len(), 2);
        assert_eq!(snapshot.records[0].customer.name, "Terceiro");
        assert_eq!(snapshot.version, 3);
    }

    #[tokio::test]
    async fn test_delete_removes_from_snapshot() {
        let state = test_state();
        let id = insert(&state, "Único");
        let mut rx = subscribe(state.clone(), ListQuery::default());

        state.with_db(|db| db.delete_opportunity(&id)).unwrap();
        state.changes.publish(ChangeEvent::Deleted(id));
        rx.changed().await.unwrap();
        assert!(rx.borrow().records.is_empty());
    }

    #[tokio::test]
    async fn test_task_stops_when_receivers_dropped() {
        let state = test_state();
        let rx = subscribe(state.clone(), ListQuery::default());
        assert_eq!(state.changes.tx.receiver_count(), 1);

        drop(rx);
        for _ in 0..10 {
            if state.changes.tx.receiver_count() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(state.changes.tx.receiver_count(), 0);
    }

    #[tokio::test]
    async fn test_lagged_feed_still_refreshes() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = AppState::from_db(
            Config::default(),
            dir.path().join("config.json"),
            test_db(),
        );
        state.changes = ChangeFeed::new(2);
        let state = Arc::new(state);

        let mut rx = subscribe(state.clone(), ListQuery::default());
        // The refresh task has not run yet, so these overflow its queue
        for n in 0..5 {
            insert(&state, &format!("Cliente {}", n));
        }

        rx.changed().await.unwrap();
        let snapshot = rx.borrow_and_update().clone();
        assert_eq!(snapshot.records.len(), 5);
        assert_eq!(snapshot.records[0].customer.name, "Cliente 4");
    }

    #[tokio::test]
    async fn test_sign_out_closes_live_query() {
        let state = test_state();
        insert(&state, "Primeiro");
        state.sessions.set(Some(Session {
            token: "t".into(),
            user_id: "u".into(),
            email: "ana@kobber.com.br".into(),
            is_admin: false,
            expires_at: Utc::now(),
        }));
        let mut rx = subscribe(state.clone(), ListQuery::default());

        state.sessions.set(None);
        assert!(rx.changed().await.is_err());
        assert_eq!(rx.borrow().records.len(), 1);
    }

    #[test]
    fn test_publish_without_listeners_is_fine() {
        let feed = ChangeFeed::default();
        feed.publish(ChangeEvent::Updated("x".into()));
    }
}
