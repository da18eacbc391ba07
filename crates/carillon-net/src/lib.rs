// Broker transport: STOMP over WebSocket with reconnection and topic routing.

pub mod connection;
pub mod frame;
pub mod memory;
pub mod outbound;
pub mod reconnect;
pub mod subscriptions;
pub mod transport;

pub use connection::{
    spawn_transport, Delivery, SubscriptionHandle, TransportCommand, TransportConfig,
    TransportEvent, TransportHandle,
};
pub use frame::{Command, Frame, Packet};
pub use memory::{AcceptMode, BrokerConnection, MemoryConnector};
pub use outbound::OutboundDispatcher;
pub use reconnect::{Backoff, Decision, ReconnectionPolicy, RetryPolicy};
pub use subscriptions::{
    DevisTopic, MessageTopic, NotificationTopic, SubscriptionRegistry, TopicFamily, TopicHandler,
};
pub use transport::{Connector, Link, WebSocketConnector};
