//! One mounted dashboard's notification list.
//!
//! A feed wraps a [`NotificationStore`] with the REST collaborators and a
//! revision channel UI consumers can await. The store lock is never held
//! across an await, so live events and REST results are applied in the
//! order they reach the feed.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use carillon_shared::protocol::Notification;
use carillon_shared::types::{NotificationId, UserId};
use carillon_store::{IngestOutcome, MarkOutcome, NotificationStore, ReconcileSummary};

use crate::api::{ApiError, NotificationApi};

pub struct NotificationFeed {
    name: String,
    owner: UserId,
    store: Mutex<NotificationStore>,
    api: Arc<dyn NotificationApi>,
    changes: watch::Sender<u64>,
}

impl std::fmt::Debug for NotificationFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationFeed")
            .field("name", &self.name)
            .field("owner", &self.owner)
            .field("unread", &self.unread_count())
            .finish()
    }
}

impl NotificationFeed {
    pub fn new(name: impl Into<String>, owner: UserId, api: Arc<dyn NotificationApi>) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            name: name.into(),
            owner,
            store: Mutex::new(NotificationStore::new(owner)),
            api,
            changes,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> UserId {
        self.owner
    }

    /// Apply a live event.
    pub fn ingest(&self, notification: Notification) -> IngestOutcome {
        self.mutate(|store| store.ingest(notification))
    }

    /// Show an outbound notification before the server echoes it back.
    pub fn push_local(&self, notification: Notification) -> carillon_store::Result<()> {
        self.mutate(|store| store.insert_optimistic(notification))
    }

    /// Fetch the REST snapshot and merge it with whatever arrived live
    /// in the meantime.
    pub async fn refresh(&self) -> Result<ReconcileSummary, ApiError> {
        let snapshot = self.api.fetch_snapshot(self.owner).await?;
        let summary = self.mutate(|store| store.reconcile_snapshot(snapshot));
        info!(
            feed = %self.name,
            inserted = summary.inserted,
            updated = summary.updated,
            unread = self.unread_count(),
            "Feed refreshed"
        );
        Ok(summary)
    }

    /// Mark locally, then tell the backend once for server-assigned ids.
    /// A failed remote call is logged; the local flag stays set.
    pub async fn mark_read(&self, id: &NotificationId) -> MarkOutcome {
        let outcome = self.mutate(|store| store.mark_read(id));
        if outcome == MarkOutcome::Unknown {
            debug!(feed = %self.name, id = %id, "Mark read on unknown notification");
            return outcome;
        }

        if let Some(server_id) = id.server_id() {
            if let Err(e) = self.api.mark_read(server_id).await {
                warn!(feed = %self.name, id = server_id, error = %e, "Remote mark read failed");
            }
        }
        outcome
    }

    /// Mark every entry read locally and on the backend. Returns how many
    /// entries changed locally.
    pub async fn mark_all_read(&self) -> usize {
        let changed = self.mutate(|store| store.mark_all_read());
        if let Err(e) = self.api.mark_all_read(self.owner).await {
            warn!(feed = %self.name, error = %e, "Remote mark all read failed");
        }
        changed
    }

    pub fn remove(&self, id: &NotificationId) -> Option<Notification> {
        self.mutate(|store| store.remove(id))
    }

    pub fn unread_count(&self) -> usize {
        self.lock().unread_count()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn get(&self, id: &NotificationId) -> Option<Notification> {
        self.lock().get(id).cloned()
    }

    /// Ordered copy, newest first.
    pub fn notifications(&self) -> Vec<Notification> {
        self.lock().notifications()
    }

    /// Store revision, updated after every change.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    // -----------------------------------------------------------------------

    fn lock(&self) -> MutexGuard<'_, NotificationStore> {
        // A panic elsewhere cannot leave the store half-mutated: every
        // mutation is a single store call.
        self.store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn mutate<T>(&self, f: impl FnOnce(&mut NotificationStore) -> T) -> T {
        let (result, revision) = {
            let mut store = self.lock();
            let result = f(&mut store);
            (result, store.revision())
        };
        self.changes.send_if_modified(|current| {
            if *current == revision {
                false
            } else {
                *current = revision;
                true
            }
        });
        result
    }
}

/// Shared handle to a feed.
pub type Feed = Arc<NotificationFeed>;

#[cfg(test)]
mod tests {
    use super::*;
    use carillon_shared::protocol::NotificationKind;
    use chrono::{Duration, Utc};

    use crate::api::mock::MockApi;

    const OWNER: UserId = UserId(7);

    fn server(id: i64, is_read: bool, age_secs: i64) -> Notification {
        let mut n = Notification::local(NotificationKind::NewOrder, OWNER, "Order", "New order");
        n.id = NotificationId::Server(id);
        n.client_ref = None;
        n.is_read = is_read;
        n.created_at = Utc::now() - Duration::seconds(age_secs);
        n
    }

    fn feed(api: Arc<MockApi>) -> NotificationFeed {
        NotificationFeed::new("dashboard", OWNER, api)
    }

    #[tokio::test]
    async fn test_mark_read_on_read_item_keeps_count_and_calls_remote_once() {
        let api = Arc::new(MockApi::default());
        let feed = feed(api.clone());
        feed.ingest(server(1, true, 10));
        feed.ingest(server(2, false, 5));
        assert_eq!(feed.unread_count(), 1);

        let outcome = feed.mark_read(&NotificationId::Server(1)).await;
        assert_eq!(outcome, MarkOutcome::AlreadyRead);
        assert_eq!(feed.unread_count(), 1);
        assert_eq!(api.mark_calls(), vec![1]);
    }

    #[tokio::test]
    async fn test_mark_read_is_local_first_and_not_rolled_back() {
        let api = Arc::new(MockApi {
            fail_marks: true,
            ..MockApi::default()
        });
        let feed = feed(api.clone());
        feed.ingest(server(3, false, 1));

        assert_eq!(feed.mark_read(&NotificationId::Server(3)).await, MarkOutcome::Marked);
        assert_eq!(feed.unread_count(), 0);
        assert!(feed.get(&NotificationId::Server(3)).unwrap().is_read);
        assert_eq!(api.mark_calls(), vec![3]);

        assert_eq!(
            feed.mark_read(&NotificationId::Server(99)).await,
            MarkOutcome::Unknown
        );
        assert_eq!(api.mark_calls(), vec![3]);
    }

    #[tokio::test]
    async fn test_local_entries_skip_remote_mark() {
        let api = Arc::new(MockApi::default());
        let feed = feed(api.clone());
        let local = Notification::local(NotificationKind::PriceChange, OWNER, "Price", "Offer");
        let id = local.id.clone();
        feed.push_local(local).unwrap();

        assert_eq!(feed.mark_read(&id).await, MarkOutcome::Marked);
        assert!(api.mark_calls().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_merges_with_live_events() {
        let api = Arc::new(MockApi::with_snapshot(vec![server(1, false, 20), server(2, true, 10)]));
        let feed = feed(api.clone());
        // Live copy of 2 arrives unread before the snapshot says it was read.
        feed.ingest(server(2, false, 10));
        feed.ingest(server(3, false, 1));

        let summary = feed.refresh().await.unwrap();
        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.updated, 1);

        let ids: Vec<_> = feed.notifications().into_iter().map(|n| n.id).collect();
        assert_eq!(
            ids,
            vec![
                NotificationId::Server(3),
                NotificationId::Server(2),
                NotificationId::Server(1)
            ]
        );
        assert_eq!(feed.unread_count(), 2);
    }

    #[tokio::test]
    async fn test_mark_all_read_and_change_feed() {
        let api = Arc::new(MockApi::default());
        let feed = feed(api.clone());
        let mut changes = feed.changes();

        feed.ingest(server(1, false, 2));
        feed.ingest(server(2, false, 1));
        assert!(changes.has_changed().unwrap());
        changes.borrow_and_update();

        assert_eq!(feed.mark_all_read().await, 2);
        assert_eq!(feed.unread_count(), 0);
        assert_eq!(*api.mark_all_calls.lock().unwrap(), vec![OWNER]);
        assert!(changes.has_changed().unwrap());
        changes.borrow_and_update();

        // Nothing left to mark: no revision bump.
        assert_eq!(feed.mark_all_read().await, 0);
        assert!(!changes.has_changed().unwrap());

        assert!(feed.remove(&NotificationId::Server(1)).is_some());
        assert_eq!(feed.len(), 1);
    }
}
