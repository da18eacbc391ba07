//! A session is everything one authenticated identity needs: the transport
//! task, the outbound dispatcher, the mounted feeds and the UI event bus.
//!
//! Sessions are explicit values. Nothing is global, so two sessions (or two
//! tests) never share a connection or a store.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use carillon_net::{
    spawn_transport, Connector, Delivery, OutboundDispatcher, SubscriptionRegistry,
    TransportEvent, TransportHandle,
};
use carillon_shared::constants::CHANNEL_CAPACITY;
use carillon_shared::credentials::CredentialSource;
use carillon_shared::error::DeliveryError;
use carillon_shared::protocol::Notification;
use carillon_shared::types::{ConnectionState, UserId};
use carillon_store::IngestOutcome;

use crate::api::NotificationApi;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::events::{emit_event, SessionEvent};
use crate::feed::{Feed, NotificationFeed};

type Feeds = Arc<Mutex<Vec<Feed>>>;

pub struct Session {
    user_id: UserId,
    transport: TransportHandle,
    dispatcher: OutboundDispatcher,
    credentials: Arc<dyn CredentialSource>,
    api: Arc<dyn NotificationApi>,
    feeds: Feeds,
    bus: broadcast::Sender<SessionEvent>,
    bridge: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("state", &self.transport.state())
            .finish()
    }
}

impl Session {
    /// Start the transport for the identity the credential source returns
    /// and request the first connection.
    pub async fn start(
        config: &ClientConfig,
        connector: Arc<dyn Connector>,
        credentials: Arc<dyn CredentialSource>,
        api: Arc<dyn NotificationApi>,
    ) -> Result<Self, ClientError> {
        let user_id = credentials
            .credentials()
            .ok_or(ClientError::NotAuthenticated)?
            .user_id;

        let (transport, events) = spawn_transport(
            connector,
            credentials.clone(),
            SubscriptionRegistry::with_defaults(),
            config.transport(),
        );
        let (bus, _) = broadcast::channel(CHANNEL_CAPACITY);
        let feeds: Feeds = Arc::new(Mutex::new(Vec::new()));

        let bridge = tokio::spawn(bridge_loop(events, feeds.clone(), bus.clone()));
        transport.connect().await?;

        info!(user_id = %user_id, endpoint = %config.broker_url, "Session started");

        Ok(Self {
            user_id,
            dispatcher: OutboundDispatcher::new(transport.clone()),
            transport,
            credentials,
            api,
            feeds,
            bus,
            bridge: Some(bridge),
        })
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn state(&self) -> ConnectionState {
        self.transport.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.transport.watch_state()
    }

    /// Subscribe to the UI event bus.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.bus.subscribe()
    }

    pub fn transport(&self) -> &TransportHandle {
        &self.transport
    }

    /// Register a feed under `name`, or return the one already mounted.
    /// The caller runs [`NotificationFeed::refresh`] to load the snapshot.
    pub fn mount(&self, name: &str) -> Feed {
        let mut feeds = lock(&self.feeds);
        if let Some(feed) = feeds.iter().find(|f| f.name() == name) {
            return feed.clone();
        }
        let feed = Arc::new(NotificationFeed::new(name, self.user_id, self.api.clone()));
        feeds.push(feed.clone());
        debug!(feed = %name, mounted = feeds.len(), "Feed mounted");
        feed
    }

    pub fn unmount(&self, name: &str) -> bool {
        let mut feeds = lock(&self.feeds);
        let before = feeds.len();
        feeds.retain(|f| f.name() != name);
        let removed = feeds.len() != before;
        if removed {
            debug!(feed = %name, mounted = feeds.len(), "Feed unmounted");
        }
        removed
    }

    pub async fn send(
        &self,
        destination: &str,
        notification: &Notification,
    ) -> Result<Delivery, DeliveryError> {
        self.dispatcher.send(destination, notification).await
    }

    pub async fn notify_user(&self, notification: &Notification) -> Result<Delivery, DeliveryError> {
        self.dispatcher.notify_user(notification).await
    }

    /// Explicit reconnect, the only way out of the offline state.
    pub async fn reconnect(&self) -> Result<(), ClientError> {
        info!(user_id = %self.user_id, "Reconnect requested");
        self.transport.connect().await?;
        Ok(())
    }

    /// The credential source was updated. A refreshed token for the same
    /// user reconnects; another user needs a new session, and this one
    /// disconnects so it never runs under the new identity.
    pub async fn credentials_changed(&self) -> Result<(), ClientError> {
        let current = self
            .credentials
            .credentials()
            .ok_or(ClientError::NotAuthenticated)?;
        if current.user_id != self.user_id {
            warn!(
                session = %self.user_id,
                current = %current.user_id,
                "Identity changed, disconnecting session"
            );
            self.transport.deactivate().await?;
            return Err(ClientError::IdentityChanged {
                session: self.user_id,
                current: current.user_id,
            });
        }
        self.transport.credentials_changed().await?;
        Ok(())
    }

    /// Tear down the connection, stop the transport task and wait for the
    /// bridge to drain.
    pub async fn close(mut self) {
        if let Err(e) = self.transport.deactivate().await {
            debug!(error = %e, "Transport already stopped");
        }
        let _ = self.transport.shutdown().await;
        if let Some(bridge) = self.bridge.take() {
            if let Err(e) = bridge.await {
                warn!(error = %e, "Session bridge ended abnormally");
            }
        }
        lock(&self.feeds).clear();
        info!(user_id = %self.user_id, "Session closed");
    }
}

fn lock(feeds: &Feeds) -> MutexGuard<'_, Vec<Feed>> {
    feeds.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Bridge
// ---------------------------------------------------------------------------

/// Apply transport events to every mounted feed and republish them on the
/// UI bus, in the order the transport emitted them.
async fn bridge_loop(
    mut events: mpsc::Receiver<TransportEvent>,
    feeds: Feeds,
    bus: broadcast::Sender<SessionEvent>,
) {
    info!("Session bridge started");

    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::StateChanged(state) => {
                debug!(state = %state, "Connection state changed (bridge)");
                emit_event(&bus, SessionEvent::ConnectionChanged { state });
            }

            TransportEvent::Notification {
                destination,
                notification,
            } => {
                debug!(
                    destination = %destination,
                    id = %notification.id,
                    "Notification received (bridge)"
                );
                dispatch(&feeds, &bus, notification);
            }

            TransportEvent::Terminal { attempts } => {
                warn!(attempts, "Broker unreachable, session offline");
                emit_event(&bus, SessionEvent::Offline { attempts });
            }
        }
    }

    info!("Session bridge stopped");
}

/// One alert per notification new to at least one feed. Re-deliveries and
/// read-flag merges update feeds silently apart from the unread count.
fn dispatch(feeds: &Feeds, bus: &broadcast::Sender<SessionEvent>, notification: Notification) {
    let mounted: Vec<Feed> = lock(feeds).clone();
    let mut fresh = false;

    for feed in &mounted {
        let before = feed.unread_count();
        let outcome = feed.ingest(notification.clone());
        match outcome {
            IngestOutcome::Rejected => continue,
            IngestOutcome::Inserted | IngestOutcome::Replaced { .. } => {
                fresh |= outcome == IngestOutcome::Inserted;
                emit_event(
                    bus,
                    SessionEvent::NotificationReceived {
                        feed: feed.name().to_string(),
                        notification: notification.clone(),
                    },
                );
            }
            IngestOutcome::Updated => {}
        }

        let unread = feed.unread_count();
        if unread != before {
            emit_event(
                bus,
                SessionEvent::UnreadChanged {
                    feed: feed.name().to_string(),
                    unread,
                },
            );
        }
    }

    if fresh && !notification.is_read {
        emit_event(
            bus,
            SessionEvent::Alert {
                title: notification.title,
                body: notification.message,
                link: notification.link,
            },
        );
    }
}
