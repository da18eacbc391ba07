use serde::Serialize;
use tokio::sync::broadcast;

use carillon_shared::protocol::Notification;
use carillon_shared::types::ConnectionState;

pub const EVENT_NOTIFICATION_RECEIVED: &str = "notification-received";
pub const EVENT_UNREAD_CHANGED: &str = "unread-changed";
pub const EVENT_CONNECTION_CHANGED: &str = "connection-changed";
pub const EVENT_OFFLINE: &str = "offline";
pub const EVENT_ALERT: &str = "alert";

/// Events published on the session's UI bus.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum SessionEvent {
    NotificationReceived {
        feed: String,
        notification: Notification,
    },
    UnreadChanged {
        feed: String,
        unread: usize,
    },
    ConnectionChanged {
        state: ConnectionState,
    },
    /// Reconnection gave up; stays offline until an explicit reconnect.
    Offline {
        attempts: u32,
    },
    /// Desktop alert for a new unread notification.
    Alert {
        title: String,
        body: String,
        link: Option<String>,
    },
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::NotificationReceived { .. } => EVENT_NOTIFICATION_RECEIVED,
            Self::UnreadChanged { .. } => EVENT_UNREAD_CHANGED,
            Self::ConnectionChanged { .. } => EVENT_CONNECTION_CHANGED,
            Self::Offline { .. } => EVENT_OFFLINE,
            Self::Alert { .. } => EVENT_ALERT,
        }
    }
}

/// Publish on the UI bus. Having no listener is not an error.
pub fn emit_event(bus: &broadcast::Sender<SessionEvent>, event: SessionEvent) {
    let name = event.name();
    if bus.send(event).is_err() {
        tracing::trace!(event = name, "No UI listener for event");
    }
}
