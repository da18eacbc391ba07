use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{NotificationId, UserId};

/// Notification categories understood by the dashboards.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    NewMessage,
    NewOrder,
    DevisUpdated,
    PriceChange,
    /// Catch-all, also used for tags this client does not know yet
    #[serde(other)]
    System,
}

/// A delivered notification, as exchanged with the REST API and the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: NotificationId,
    /// Correlates an optimistic local entry with the server record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ref: Option<Uuid>,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    pub target_user_id: UserId,
    #[serde(default, alias = "read")]
    pub is_read: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Notification {
    /// Build an optimistic entry. Its `client_ref` equals the local id so the
    /// server echo can be matched back to it.
    pub fn local(
        kind: NotificationKind,
        target_user_id: UserId,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let reference = Uuid::new_v4();
        Self {
            id: NotificationId::Local(reference),
            client_ref: Some(reference),
            kind,
            title: title.into(),
            message: message.into(),
            sender_id: None,
            sender_name: None,
            target_user_id,
            is_read: false,
            created_at: Utc::now(),
            link: None,
            data: None,
        }
    }

    pub fn with_sender(mut self, sender_id: UserId, sender_name: impl Into<String>) -> Self {
        self.sender_id = Some(sender_id);
        self.sender_name = Some(sender_name.into());
        self
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn is_optimistic(&self) -> bool {
        self.id.is_local()
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_json(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}

/// Chat message pushed on the per-user message topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEvent {
    pub id: i64,
    #[serde(default)]
    pub conversation_id: Option<i64>,
    pub sender_id: UserId,
    #[serde(default)]
    pub sender_name: Option<String>,
    pub recipient_id: UserId,
    #[serde(default)]
    pub content: String,
    #[serde(default = "Utc::now")]
    pub sent_at: DateTime<Utc>,
}

impl MessageEvent {
    pub fn into_notification(self) -> Notification {
        let sender = self
            .sender_name
            .clone()
            .unwrap_or_else(|| format!("user {}", self.sender_id));
        let link = match self.conversation_id {
            Some(conversation) => format!("/messages/{conversation}"),
            None => "/messages".to_string(),
        };

        Notification {
            id: NotificationId::Derived(format!("message:{}", self.id)),
            client_ref: None,
            kind: NotificationKind::NewMessage,
            title: format!("New message from {sender}"),
            message: self.content,
            sender_id: Some(self.sender_id),
            sender_name: self.sender_name,
            target_user_id: self.recipient_id,
            is_read: false,
            created_at: self.sent_at,
            link: Some(link),
            data: self
                .conversation_id
                .map(|conversation| serde_json::json!({ "conversationId": conversation })),
        }
    }
}

/// Status change of a devis (quote) pushed on the per-user devis topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevisEvent {
    pub devis_id: i64,
    #[serde(default)]
    pub reference: Option<String>,
    pub status: String,
    pub recipient_id: UserId,
    #[serde(default)]
    pub updated_by: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl DevisEvent {
    pub fn into_notification(self) -> Notification {
        let label = self
            .reference
            .clone()
            .unwrap_or_else(|| format!("#{}", self.devis_id));
        let message = self.message.clone().unwrap_or_else(|| match &self.updated_by {
            Some(who) => format!("Devis {label} is now {} ({who})", self.status),
            None => format!("Devis {label} is now {}", self.status),
        });

        Notification {
            id: NotificationId::Derived(format!("devis:{}:{}", self.devis_id, self.status)),
            client_ref: None,
            kind: NotificationKind::DevisUpdated,
            title: format!("Devis {label} updated"),
            message,
            sender_id: None,
            sender_name: self.updated_by,
            target_user_id: self.recipient_id,
            is_read: false,
            created_at: self.updated_at,
            link: Some(format!("/devis/{}", self.devis_id)),
            data: Some(serde_json::json!({
                "devisId": self.devis_id,
                "status": self.status,
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_from_backend_json() {
        let json = br#"{
            "id": 12,
            "type": "NEW_ORDER",
            "title": "Order received",
            "message": "Order 55 was placed",
            "targetUserId": 3,
            "read": true,
            "createdAt": "2024-05-01T10:00:00Z"
        }"#;

        let n = Notification::from_json(json).unwrap();
        assert_eq!(n.id, NotificationId::Server(12));
        assert_eq!(n.kind, NotificationKind::NewOrder);
        assert_eq!(n.target_user_id, UserId(3));
        assert!(n.is_read);
        assert!(n.sender_id.is_none());
    }

    #[test]
    fn test_unknown_kind_falls_back_to_system() {
        let json = br#"{"id": 1, "type": "PROMOTION", "targetUserId": 3}"#;
        let n = Notification::from_json(json).unwrap();
        assert_eq!(n.kind, NotificationKind::System);
        assert!(!n.is_read);
    }

    #[test]
    fn test_local_notification_is_optimistic() {
        let n = Notification::local(NotificationKind::PriceChange, UserId(8), "Price", "Updated")
            .with_sender(UserId(2), "Agent Smith");
        assert!(n.is_optimistic());
        match (&n.id, n.client_ref) {
            (NotificationId::Local(id), Some(reference)) => assert_eq!(*id, reference),
            other => panic!("unexpected ids: {other:?}"),
        }

        let wire = String::from_utf8(n.to_json().unwrap()).unwrap();
        assert!(wire.contains("\"clientRef\""));
        assert!(wire.contains("\"type\":\"PRICE_CHANGE\""));
    }

    #[test]
    fn test_message_event_conversion() {
        let json = br#"{"id": 40, "conversationId": 7, "senderId": 2, "senderName": "Alice",
                        "recipientId": 3, "content": "Hello"}"#;
        let event: MessageEvent = serde_json::from_slice(json).unwrap();
        let n = event.into_notification();

        assert_eq!(n.id, NotificationId::Derived("message:40".into()));
        assert_eq!(n.kind, NotificationKind::NewMessage);
        assert_eq!(n.title, "New message from Alice");
        assert_eq!(n.link.as_deref(), Some("/messages/7"));
        assert_eq!(n.target_user_id, UserId(3));
    }

    #[test]
    fn test_devis_event_conversion() {
        let json = br#"{"devisId": 5, "reference": "DV-2024-005", "status": "ACCEPTED",
                        "recipientId": 3, "updatedBy": "Bob"}"#;
        let event: DevisEvent = serde_json::from_slice(json).unwrap();
        let n = event.into_notification();

        assert_eq!(n.id, NotificationId::Derived("devis:5:ACCEPTED".into()));
        assert_eq!(n.kind, NotificationKind::DevisUpdated);
        assert_eq!(n.message, "Devis DV-2024-005 is now ACCEPTED (Bob)");
        assert_eq!(n.data.unwrap()["devisId"], 5);
    }
}
