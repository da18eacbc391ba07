//! Per-user topic families and inbound routing.
//!
//! The registry is a declarative table of topic templates. Binding it to a
//! user id turns every template into a concrete destination; `activate`
//! yields the SUBSCRIBE frames to replay on each fresh connection. Inbound
//! MESSAGE frames are routed back to the family handler by subscription id.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::debug;

use carillon_shared::constants::{TOPIC_DEVIS_UPDATES, TOPIC_MESSAGES, TOPIC_NOTIFICATIONS};
use carillon_shared::error::RoutingError;
use carillon_shared::protocol::{DevisEvent, MessageEvent, Notification};
use carillon_shared::types::UserId;

use crate::frame::Frame;

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Turns a raw payload into a notification. Runs inside the transport task;
/// panics are caught and reported as [`RoutingError::HandlerPanicked`].
pub trait TopicHandler: Send + Sync + 'static {
    fn route(&self, payload: &[u8]) -> Result<Notification, RoutingError>;
}

impl fmt::Debug for dyn TopicHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TopicHandler")
    }
}

impl<F> TopicHandler for F
where
    F: Fn(&[u8]) -> Result<Notification, RoutingError> + Send + Sync + 'static,
{
    fn route(&self, payload: &[u8]) -> Result<Notification, RoutingError> {
        self(payload)
    }
}

/// Full notification records, as stored by the backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotificationTopic;

impl TopicHandler for NotificationTopic {
    fn route(&self, payload: &[u8]) -> Result<Notification, RoutingError> {
        Ok(Notification::from_json(payload)?)
    }
}

/// Chat messages, surfaced as `NEW_MESSAGE` notifications.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageTopic;

impl TopicHandler for MessageTopic {
    fn route(&self, payload: &[u8]) -> Result<Notification, RoutingError> {
        let event: MessageEvent = serde_json::from_slice(payload)?;
        Ok(event.into_notification())
    }
}

/// Devis status changes, surfaced as `DEVIS_UPDATED` notifications.
#[derive(Debug, Clone, Copy, Default)]
pub struct DevisTopic;

impl TopicHandler for DevisTopic {
    fn route(&self, payload: &[u8]) -> Result<Notification, RoutingError> {
        let event: DevisEvent = serde_json::from_slice(payload)?;
        Ok(event.into_notification())
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TopicFamily {
    pub name: String,
    /// Destination template containing `{userId}`.
    pub template: String,
    pub handler: Arc<dyn TopicHandler>,
}

#[derive(Debug)]
struct ActiveSubscription {
    destination: String,
    handler: Arc<dyn TopicHandler>,
    /// Registered family (re-applied on reconnect) rather than ad-hoc.
    persistent: bool,
}

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    families: Vec<TopicFamily>,
    user_id: Option<UserId>,
    active: HashMap<String, ActiveSubscription>,
    next_adhoc: u64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications, messages and devis updates for the bound user.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("notifications", TOPIC_NOTIFICATIONS, NotificationTopic);
        registry.register("messages", TOPIC_MESSAGES, MessageTopic);
        registry.register("devis-updates", TOPIC_DEVIS_UPDATES, DevisTopic);
        registry
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        template: impl Into<String>,
        handler: impl TopicHandler,
    ) {
        self.families.push(TopicFamily {
            name: name.into(),
            template: template.into(),
            handler: Arc::new(handler),
        });
    }

    pub fn families(&self) -> &[TopicFamily] {
        &self.families
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    /// Bind the families to `user_id`. Returns `true` when the identity
    /// changed, in which case every active subscription is forgotten.
    pub fn bind(&mut self, user_id: UserId) -> bool {
        if self.user_id == Some(user_id) {
            return false;
        }
        debug!(user_id = %user_id, "Binding topic families");
        self.user_id = Some(user_id);
        self.active.clear();
        true
    }

    /// SUBSCRIBE frames for a fresh connection. Subscription ids are stable
    /// across reconnects (`sub-<index>`); ad-hoc entries from the previous
    /// connection are dropped.
    pub fn activate(&mut self) -> Vec<Frame> {
        self.active.clear();
        let Some(user_id) = self.user_id else {
            return Vec::new();
        };

        let mut frames = Vec::with_capacity(self.families.len());
        for (index, family) in self.families.iter().enumerate() {
            let id = format!("sub-{index}");
            let destination = user_id.bind(&family.template);
            debug!(id = %id, family = %family.name, destination = %destination, "Subscribing");
            frames.push(Frame::subscribe(&id, &destination));
            self.active.insert(
                id,
                ActiveSubscription {
                    destination,
                    handler: Arc::clone(&family.handler),
                    persistent: true,
                },
            );
        }
        frames
    }

    /// Track a raw subscription for the current connection. Returns its id
    /// and the SUBSCRIBE frame.
    pub fn add_adhoc(
        &mut self,
        destination: &str,
        handler: Arc<dyn TopicHandler>,
    ) -> (String, Frame) {
        self.next_adhoc += 1;
        let id = format!("adhoc-{}", self.next_adhoc);
        self.active.insert(
            id.clone(),
            ActiveSubscription {
                destination: destination.to_string(),
                handler,
                persistent: false,
            },
        );
        let frame = Frame::subscribe(&id, destination);
        (id, frame)
    }

    /// UNSUBSCRIBE frame for `id`, `None` when it is not active (for example
    /// after a reconnect).
    pub fn remove(&mut self, id: &str) -> Option<Frame> {
        self.active.remove(id).map(|_| Frame::unsubscribe(id))
    }

    /// UNSUBSCRIBE frames for every active subscription.
    pub fn deactivate(&mut self) -> Vec<Frame> {
        let mut ids: Vec<String> = self.active.drain().map(|(id, _)| id).collect();
        ids.sort();
        ids.iter().map(|id| Frame::unsubscribe(id)).collect()
    }

    pub fn clear_active(&mut self) {
        self.active.clear();
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Route an inbound MESSAGE frame. Returns the destination it arrived on
    /// and the normalized notification.
    pub fn route(&self, frame: &Frame) -> Result<(String, Notification), RoutingError> {
        let entry = match frame.get("subscription") {
            Some(id) => self.active.get(id),
            None => frame
                .get("destination")
                .and_then(|dest| self.active.values().find(|sub| sub.destination == dest)),
        };
        let Some(entry) = entry else {
            let key = frame
                .get("subscription")
                .or_else(|| frame.get("destination"))
                .unwrap_or("<none>");
            return Err(RoutingError::UnknownSubscription(key.to_string()));
        };

        let handler = Arc::clone(&entry.handler);
        let routed = catch_unwind(AssertUnwindSafe(|| handler.route(&frame.body)))
            .map_err(|panic| RoutingError::HandlerPanicked(panic_message(panic.as_ref())))?;
        let notification = routed?;

        if entry.persistent {
            if let Some(expected) = self.user_id {
                if notification.target_user_id != expected {
                    return Err(RoutingError::WrongRecipient {
                        expected,
                        actual: notification.target_user_id,
                    });
                }
            }
        }

        Ok((entry.destination.clone(), notification))
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
