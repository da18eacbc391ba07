//! Outbound notification sends.
//!
//! The dispatcher serializes a notification and hands it to the transport,
//! which publishes it on a live link or queues it until the next connect.
//! Failures always come back to the caller; nothing is retried beyond the
//! transport's bounds.

use tracing::{debug, warn};

use carillon_shared::constants::DESTINATION_SEND_NOTIFICATION;
use carillon_shared::error::DeliveryError;
use carillon_shared::protocol::Notification;

use crate::connection::{Delivery, TransportHandle};

#[derive(Debug, Clone)]
pub struct OutboundDispatcher {
    transport: TransportHandle,
}

impl OutboundDispatcher {
    pub fn new(transport: TransportHandle) -> Self {
        Self { transport }
    }

    /// Send `notification` to `destination`.
    ///
    /// Resolves with [`Delivery::Immediate`] when the link was live, with
    /// [`Delivery::Replayed`] after a reconnect, or with a
    /// [`DeliveryError`] the caller must handle.
    pub async fn send(
        &self,
        destination: &str,
        notification: &Notification,
    ) -> Result<Delivery, DeliveryError> {
        let payload = notification
            .to_json()
            .map_err(|e| DeliveryError::Serialization(e.to_string()))?;

        match self.transport.submit(destination, payload).await {
            Ok(delivery) => {
                debug!(
                    destination = %destination,
                    id = %notification.id,
                    delivery = ?delivery,
                    "Notification delivered to broker"
                );
                Ok(delivery)
            }
            Err(e) => {
                warn!(
                    destination = %destination,
                    id = %notification.id,
                    error = %e,
                    "Notification not delivered"
                );
                Err(e)
            }
        }
    }

    /// Send to the notification destination of `notification.target_user_id`.
    pub async fn notify_user(
        &self,
        notification: &Notification,
    ) -> Result<Delivery, DeliveryError> {
        let destination = notification
            .target_user_id
            .bind(DESTINATION_SEND_NOTIFICATION);
        self.send(&destination, notification).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use carillon_shared::credentials::StaticCredentials;
    use carillon_shared::protocol::NotificationKind;
    use carillon_shared::types::{Credentials, UserId};

    use crate::connection::{spawn_transport, TransportConfig};
    use crate::frame::Command;
    use crate::memory::MemoryConnector;
    use crate::reconnect::RetryPolicy;
    use crate::subscriptions::SubscriptionRegistry;

    #[tokio::test(start_paused = true)]
    async fn test_notify_user_targets_recipient_destination() {
        let connector = MemoryConnector::new();
        let config = TransportConfig {
            endpoint: "ws://broker.test/ws".into(),
            reconnect: RetryPolicy::new(3, Duration::from_millis(100)),
            heartbeat: Duration::ZERO,
            ..TransportConfig::default()
        };
        let (handle, _events) = spawn_transport(
            Arc::new(connector.clone()),
            Arc::new(StaticCredentials::new(Credentials::new(UserId(1), "t"))),
            SubscriptionRegistry::with_defaults(),
            config,
        );
        let dispatcher = OutboundDispatcher::new(handle);

        let notification = Notification::local(NotificationKind::PriceChange, UserId(9), "Price", "New offer")
            .with_sender(UserId(1), "Agent");
        let send = {
            let dispatcher = dispatcher.clone();
            let notification = notification.clone();
            tokio::spawn(async move { dispatcher.notify_user(&notification).await })
        };

        let mut broker = connector.accept().await.unwrap();
        broker.complete_handshake().await.unwrap();
        broker.expect_subscriptions(3).await.unwrap();
        let frame = broker.next_frame().await.unwrap();
        assert_eq!(frame.command, Command::Send);
        assert_eq!(frame.get("destination"), Some("/app/notifications/9"));
        assert_eq!(Notification::from_json(&frame.body).unwrap(), notification);

        assert!(matches!(send.await.unwrap(), Ok(Delivery::Replayed { .. })));

        // Live link: immediate.
        let delivery = dispatcher.notify_user(&notification).await.unwrap();
        assert_eq!(delivery, Delivery::Immediate);
    }
}
