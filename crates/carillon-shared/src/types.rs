use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::USER_ID_PLACEHOLDER;

// Numeric account id assigned by the backend
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl UserId {
    /// Substitute this id into a topic template such as `/topic/messages/{userId}`.
    pub fn bind(&self, template: &str) -> String {
        template.replace(USER_ID_PLACEHOLDER, &self.0.to_string())
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a notification inside a store.
///
/// Records fetched from or pushed by the backend carry a numeric id.
/// Events derived from other topics (chat messages, devis updates) get a
/// deterministic string key so that redelivery de-duplicates. Optimistic
/// entries created locally use a random UUID until the server record
/// arrives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum NotificationId {
    Server(i64),
    Local(Uuid),
    Derived(String),
}

impl NotificationId {
    pub fn local() -> Self {
        Self::Local(Uuid::new_v4())
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }

    /// The backend id, if this record is known to the REST API.
    pub fn server_id(&self) -> Option<i64> {
        match self {
            Self::Server(id) => Some(*id),
            _ => None,
        }
    }
}

impl std::fmt::Display for NotificationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Server(id) => write!(f, "{id}"),
            Self::Local(uuid) => write!(f, "local-{uuid}"),
            Self::Derived(key) => write!(f, "{key}"),
        }
    }
}

impl From<i64> for NotificationId {
    fn from(id: i64) -> Self {
        Self::Server(id)
    }
}

/// Identity used to authenticate against the broker and the REST API.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user_id: UserId,
    pub token: String,
}

impl Credentials {
    pub fn new(user_id: UserId, token: impl Into<String>) -> Self {
        Self {
            user_id,
            token: token.into(),
        }
    }

    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

// Keep tokens out of logs.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user_id", &self.user_id)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Lifecycle of the broker connection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum ConnectionState {
    /// No connection and none requested.
    Idle,
    /// First connection attempt in progress.
    Connecting,
    /// Handshake completed, subscriptions applied.
    Connected,
    /// Waiting for or running retry number `attempt`.
    Reconnecting { attempt: u32 },
    /// Gave up after `attempts` consecutive failures. Only an explicit
    /// connect request leaves this state.
    Failed { attempts: u32 },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
            Self::Failed { attempts } => write!(f, "failed after {attempts} attempts"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_topic() {
        let user = UserId(42);
        assert_eq!(user.bind("/topic/messages/{userId}"), "/topic/messages/42");
        assert_eq!(user.bind("/topic/broadcast"), "/topic/broadcast");
    }

    #[test]
    fn test_notification_id_json_forms() {
        let server: NotificationId = serde_json::from_str("17").unwrap();
        assert_eq!(server, NotificationId::Server(17));

        let uuid = Uuid::new_v4();
        let local: NotificationId = serde_json::from_str(&format!("\"{uuid}\"")).unwrap();
        assert_eq!(local, NotificationId::Local(uuid));

        let derived: NotificationId = serde_json::from_str("\"message:9\"").unwrap();
        assert_eq!(derived, NotificationId::Derived("message:9".into()));
        assert_eq!(derived.server_id(), None);
    }

    #[test]
    fn test_credentials_debug_hides_token() {
        let creds = Credentials::new(UserId(1), "secret-token");
        let printed = format!("{creds:?}");
        assert!(!printed.contains("secret-token"));
        assert_eq!(creds.bearer(), "Bearer secret-token");
    }
}
