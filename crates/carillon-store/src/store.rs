use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use carillon_shared::protocol::Notification;
use carillon_shared::types::{NotificationId, UserId};

use crate::error::{Result, StoreError};

/// What `ingest` did with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// New id, inserted at its ordered position.
    Inserted,
    /// Known id, fields merged in place.
    Updated,
    /// Server record took over the optimistic entry `previous`.
    Replaced { previous: NotificationId },
    /// Addressed to another user; not stored.
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    Marked,
    AlreadyRead,
    Unknown,
}

/// Counts from a snapshot merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub inserted: usize,
    pub updated: usize,
    pub replaced: usize,
    pub rejected: usize,
}

#[derive(Debug, Clone)]
struct Entry {
    notification: Notification,
    /// Ordering key, fixed when the entry is first inserted.
    sort_at: DateTime<Utc>,
}

/// Ordered, de-duplicated notifications of one recipient.
///
/// Entries are kept newest first; equal timestamps put the later insertion
/// first. Merges and optimistic replacements keep the entry where it is. The
/// unread counter is adjusted on every mutation and never recomputed.
#[derive(Debug, Clone)]
pub struct NotificationStore {
    owner: UserId,
    entries: Vec<Entry>,
    ids: HashSet<NotificationId>,
    /// client_ref -> current id of the entry carrying it.
    refs: HashMap<Uuid, NotificationId>,
    unread: usize,
    revision: u64,
}

impl NotificationStore {
    pub fn new(owner: UserId) -> Self {
        Self {
            owner,
            entries: Vec::new(),
            ids: HashSet::new(),
            refs: HashMap::new(),
            unread: 0,
            revision: 0,
        }
    }

    pub fn owner(&self) -> UserId {
        self.owner
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn unread_count(&self) -> usize {
        self.unread
    }

    /// Bumped by every mutation that changed the list or a flag.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn contains(&self, id: &NotificationId) -> bool {
        self.ids.contains(id)
    }

    pub fn get(&self, id: &NotificationId) -> Option<&Notification> {
        self.position(id).map(|pos| &self.entries[pos].notification)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Notification> {
        self.entries.iter().map(|entry| &entry.notification)
    }

    /// Ordered copy for UI consumers.
    pub fn notifications(&self) -> Vec<Notification> {
        self.iter().cloned().collect()
    }

    /// Apply a live or fetched event.
    pub fn ingest(&mut self, mut notification: Notification) -> IngestOutcome {
        if notification.target_user_id != self.owner {
            warn!(
                id = %notification.id,
                target = %notification.target_user_id,
                owner = %self.owner,
                "Ignoring notification for another user"
            );
            return IngestOutcome::Rejected;
        }

        let optimistic = notification
            .client_ref
            .and_then(|reference| self.refs.get(&reference))
            .filter(|id| id.is_local() && **id != notification.id)
            .cloned();

        if self.contains(&notification.id) {
            // The server record got here first without its client_ref; the
            // optimistic copy is now a duplicate.
            let stale = optimistic.and_then(|previous| {
                let removed = self.remove(&previous)?;
                notification.is_read |= removed.is_read;
                Some(previous)
            });
            if let Some(pos) = self.position(&notification.id) {
                self.merge_at(pos, notification);
            }
            return match stale {
                Some(previous) => {
                    debug!(local = %previous, "Optimistic duplicate dropped");
                    IngestOutcome::Replaced { previous }
                }
                None => IngestOutcome::Updated,
            };
        }

        if let Some(previous) = optimistic {
            if let Some(pos) = self.position(&previous) {
                debug!(local = %previous, server = %notification.id, "Optimistic entry confirmed");
                self.ids.remove(&previous);
                self.ids.insert(notification.id.clone());
                self.merge_at(pos, notification);
                return IngestOutcome::Replaced { previous };
            }
        }

        self.insert(notification);
        IngestOutcome::Inserted
    }

    /// Show a locally created entry before the server confirms it.
    pub fn insert_optimistic(&mut self, mut notification: Notification) -> Result<()> {
        let NotificationId::Local(reference) = notification.id else {
            return Err(StoreError::NotOptimistic(notification.id));
        };
        if notification.target_user_id != self.owner {
            return Err(StoreError::WrongOwner {
                owner: self.owner,
                target: notification.target_user_id,
            });
        }
        if self.ids.contains(&notification.id) {
            return Err(StoreError::DuplicateId(notification.id));
        }
        if notification.client_ref.is_none() {
            notification.client_ref = Some(reference);
        }
        self.insert(notification);
        Ok(())
    }

    /// Local read transition. Idempotent.
    pub fn mark_read(&mut self, id: &NotificationId) -> MarkOutcome {
        let Some(pos) = self.position(id) else {
            return MarkOutcome::Unknown;
        };
        let entry = &mut self.entries[pos].notification;
        if entry.is_read {
            return MarkOutcome::AlreadyRead;
        }
        entry.is_read = true;
        self.unread -= 1;
        self.revision += 1;
        MarkOutcome::Marked
    }

    /// Mark everything read; returns how many entries changed.
    pub fn mark_all_read(&mut self) -> usize {
        let mut changed = 0;
        for entry in self.entries.iter_mut().filter(|e| !e.notification.is_read) {
            entry.notification.is_read = true;
            changed += 1;
        }
        if changed > 0 {
            self.unread -= changed;
            self.revision += 1;
        }
        changed
    }

    pub fn remove(&mut self, id: &NotificationId) -> Option<Notification> {
        let pos = self.position(id)?;
        let entry = self.entries.remove(pos);
        self.ids.remove(id);
        if let Some(reference) = entry.notification.client_ref {
            self.refs.remove(&reference);
        }
        if !entry.notification.is_read {
            self.unread -= 1;
        }
        self.revision += 1;
        Some(entry.notification)
    }

    /// Merge the REST snapshot with whatever live events already arrived.
    /// Nothing already present is dropped; read flags only move to read.
    pub fn reconcile_snapshot(&mut self, snapshot: Vec<Notification>) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();
        for notification in snapshot {
            match self.ingest(notification) {
                IngestOutcome::Inserted => summary.inserted += 1,
                IngestOutcome::Updated => summary.updated += 1,
                IngestOutcome::Replaced { .. } => summary.replaced += 1,
                IngestOutcome::Rejected => summary.rejected += 1,
            }
        }
        debug!(
            inserted = summary.inserted,
            updated = summary.updated,
            replaced = summary.replaced,
            total = self.len(),
            unread = self.unread,
            "Snapshot reconciled"
        );
        summary
    }

    // -----------------------------------------------------------------------

    fn position(&self, id: &NotificationId) -> Option<usize> {
        if !self.ids.contains(id) {
            return None;
        }
        self.entries.iter().position(|e| &e.notification.id == id)
    }

    fn insert(&mut self, notification: Notification) {
        let sort_at = notification.created_at;
        // Later insertions precede equal timestamps.
        let pos = self.entries.partition_point(|e| e.sort_at > sort_at);

        if !notification.is_read {
            self.unread += 1;
        }
        if let Some(reference) = notification.client_ref {
            self.refs.insert(reference, notification.id.clone());
        }
        self.ids.insert(notification.id.clone());
        self.entries.insert(
            pos,
            Entry {
                notification,
                sort_at,
            },
        );
        self.revision += 1;
    }

    fn merge_at(&mut self, pos: usize, mut incoming: Notification) {
        let entry = &mut self.entries[pos];
        let was_read = entry.notification.is_read;
        incoming.is_read |= was_read;
        if incoming.client_ref.is_none() {
            incoming.client_ref = entry.notification.client_ref;
        }
        if let Some(reference) = incoming.client_ref {
            self.refs.insert(reference, incoming.id.clone());
        }
        if !was_read && incoming.is_read {
            self.unread -= 1;
        }
        entry.notification = incoming;
        self.revision += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use carillon_shared::protocol::NotificationKind;

    const OWNER: UserId = UserId(1);

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    fn server(id: i64, seconds: i64, read: bool) -> Notification {
        let mut n = Notification::local(NotificationKind::System, OWNER, format!("n{id}"), "");
        n.id = NotificationId::Server(id);
        n.client_ref = None;
        n.created_at = at(seconds);
        n.is_read = read;
        n
    }

    fn sid(id: i64) -> NotificationId {
        NotificationId::Server(id)
    }

    fn ids(store: &NotificationStore) -> Vec<String> {
        store.iter().map(|n| n.id.to_string()).collect()
    }

    fn recount(store: &NotificationStore) -> usize {
        store.iter().filter(|n| !n.is_read).count()
    }

    #[test]
    fn test_newest_first_with_insertion_tiebreak() {
        let mut store = NotificationStore::new(OWNER);
        store.ingest(server(1, 10, false));
        store.ingest(server(2, 30, false));
        store.ingest(server(3, 20, false));
        store.ingest(server(4, 20, false));
        assert_eq!(ids(&store), vec!["2", "4", "3", "1"]);
    }

    #[test]
    fn test_duplicate_ids_merge() {
        let mut store = NotificationStore::new(OWNER);
        assert_eq!(store.ingest(server(1, 10, false)), IngestOutcome::Inserted);
        let mut again = server(1, 10, false);
        again.title = "edited".into();
        assert_eq!(store.ingest(again), IngestOutcome::Updated);

        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&sid(1)).unwrap().title, "edited");
        assert_eq!(store.unread_count(), 1);
    }

    #[test]
    fn test_read_flag_never_reverts() {
        let mut store = NotificationStore::new(OWNER);
        store.ingest(server(1, 10, false));
        store.mark_read(&sid(1));
        store.ingest(server(1, 10, false));
        assert!(store.get(&sid(1)).unwrap().is_read);
        assert_eq!(store.unread_count(), 0);
    }

    #[test]
    fn test_mark_read_is_idempotent() {
        let mut store = NotificationStore::new(OWNER);
        store.ingest(server(1, 10, false));
        store.ingest(server(2, 20, false));

        assert_eq!(store.mark_read(&sid(1)), MarkOutcome::Marked);
        let revision = store.revision();
        assert_eq!(store.mark_read(&sid(1)), MarkOutcome::AlreadyRead);
        assert_eq!(store.unread_count(), 1);
        assert_eq!(store.revision(), revision);
        assert_eq!(store.mark_read(&sid(99)), MarkOutcome::Unknown);
    }

    #[test]
    fn test_optimistic_entry_replaced_in_place() {
        let mut store = NotificationStore::new(OWNER);
        store.ingest(server(1, 10, false));
        let local = Notification::local(NotificationKind::NewOrder, OWNER, "Order sent", "#4");
        let local_id = local.id.clone();
        let reference = local.client_ref;
        store.insert_optimistic(local).unwrap();
        store.ingest(server(2, -50, false));
        assert_eq!(store.iter().next().unwrap().id, local_id);

        let mut confirmed = server(77, 5, false);
        confirmed.client_ref = reference;
        confirmed.title = "Order #4 confirmed".into();
        assert_eq!(
            store.ingest(confirmed),
            IngestOutcome::Replaced { previous: local_id.clone() }
        );

        assert_eq!(ids(&store), vec!["77", "1", "2"]);
        assert!(!store.contains(&local_id));
        assert_eq!(store.get(&sid(77)).unwrap().title, "Order #4 confirmed");
        assert_eq!(store.unread_count(), 3);

        // The echo arriving twice stays a single entry.
        let mut echo = server(77, 5, false);
        echo.client_ref = reference;
        assert_eq!(store.ingest(echo), IngestOutcome::Updated);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_optimistic_entry_dropped_when_snapshot_came_first() {
        let mut store = NotificationStore::new(OWNER);
        let local = Notification::local(NotificationKind::NewOrder, OWNER, "Order sent", "#4");
        let local_id = local.id.clone();
        let reference = local.client_ref;
        store.insert_optimistic(local).unwrap();

        // Snapshot carries the server record without the client reference.
        store.reconcile_snapshot(vec![server(77, 5, false)]);
        assert_eq!(store.len(), 2);

        let mut echo = server(77, 5, false);
        echo.client_ref = reference;
        assert_eq!(
            store.ingest(echo),
            IngestOutcome::Replaced { previous: local_id.clone() }
        );
        assert_eq!(ids(&store), vec!["77"]);
        assert!(!store.contains(&local_id));
        assert_eq!(store.unread_count(), 1);
        assert_eq!(store.unread_count(), recount(&store));

        // Later echoes of the same record are plain merges.
        let mut again = server(77, 5, false);
        again.client_ref = reference;
        assert_eq!(store.ingest(again), IngestOutcome::Updated);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_optimistic_requires_local_id() {
        let mut store = NotificationStore::new(OWNER);
        assert!(matches!(
            store.insert_optimistic(server(1, 0, false)),
            Err(StoreError::NotOptimistic(_))
        ));
        let foreign = Notification::local(NotificationKind::System, UserId(2), "x", "y");
        assert!(matches!(
            store.insert_optimistic(foreign),
            Err(StoreError::WrongOwner { .. })
        ));
    }

    #[test]
    fn test_snapshot_race_keeps_live_events() {
        let mut store = NotificationStore::new(OWNER);
        // Live push lands before the snapshot fetch resolves.
        store.ingest(server(2, 20, false));
        let summary = store.reconcile_snapshot(vec![server(1, 10, false), server(2, 20, false)]);

        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.updated, 1);
        assert_eq!(ids(&store), vec!["2", "1"]);
        assert_eq!(store.unread_count(), 2);
    }

    #[test]
    fn test_snapshot_read_flags_merge() {
        let mut store = NotificationStore::new(OWNER);
        store.ingest(server(1, 10, false));
        store.ingest(server(2, 20, false));
        store.mark_read(&sid(2));

        store.reconcile_snapshot(vec![server(1, 10, true), server(2, 20, false)]);
        assert_eq!(store.unread_count(), 0);
        assert_eq!(store.unread_count(), recount(&store));
    }

    #[test]
    fn test_foreign_notifications_rejected() {
        let mut store = NotificationStore::new(OWNER);
        let mut other = server(1, 0, false);
        other.target_user_id = UserId(9);
        assert_eq!(store.ingest(other), IngestOutcome::Rejected);
        assert!(store.is_empty());
    }

    #[test]
    fn test_mark_all_and_remove() {
        let mut store = NotificationStore::new(OWNER);
        for id in 1..=4 {
            store.ingest(server(id, id, id == 2));
        }
        assert_eq!(store.unread_count(), 3);

        assert!(store.remove(&sid(3)).is_some());
        assert_eq!(store.unread_count(), 2);
        assert!(store.remove(&sid(3)).is_none());

        assert_eq!(store.mark_all_read(), 2);
        assert_eq!(store.mark_all_read(), 0);
        assert_eq!(store.unread_count(), 0);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_counter_matches_recount_under_mixed_operations() {
        let mut store = NotificationStore::new(OWNER);
        let mut reference = None;
        for step in 0..60i64 {
            match step % 6 {
                0 => {
                    let local = Notification::local(NotificationKind::System, OWNER, "l", "");
                    reference = local.client_ref;
                    store.insert_optimistic(local).unwrap();
                }
                1 => {
                    let mut confirmed = server(1000 + step, step, step % 4 == 0);
                    confirmed.client_ref = reference.take();
                    store.ingest(confirmed);
                }
                2 => {
                    store.ingest(server(step % 7, step, false));
                }
                3 => {
                    store.mark_read(&NotificationId::Server(step % 7));
                }
                4 => {
                    store.remove(&NotificationId::Server(step % 5));
                }
                _ => {
                    store.ingest(server(step % 7, step, step % 2 == 0));
                }
            }
            assert_eq!(store.unread_count(), recount(&store), "step {step}");
            let unique: HashSet<_> = store.iter().map(|n| n.id.clone()).collect();
            assert_eq!(unique.len(), store.len());
        }
    }
}
