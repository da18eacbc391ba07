/// Application name
pub const APP_NAME: &str = "Carillon";

/// STOMP protocol version negotiated with the broker
pub const STOMP_VERSION: &str = "1.2";

/// Placeholder substituted with the numeric user id in topic templates
pub const USER_ID_PLACEHOLDER: &str = "{userId}";

/// Per-user notification topic (full notification records)
pub const TOPIC_NOTIFICATIONS: &str = "/topic/notifications/{userId}";

/// Per-user chat message topic
pub const TOPIC_MESSAGES: &str = "/topic/messages/{userId}";

/// Per-user devis (quote) status topic
pub const TOPIC_DEVIS_UPDATES: &str = "/topic/devis-updates/{userId}";

/// Destination used to push a notification to another user
pub const DESTINATION_SEND_NOTIFICATION: &str = "/app/notifications/{userId}";

/// Default broker endpoint (STOMP over WebSocket)
pub const DEFAULT_BROKER_URL: &str = "ws://localhost:8080/ws";

/// Broker URL selecting the in-process loopback broker
pub const OFFLINE_BROKER_URL: &str = "memory";

/// Default REST API base URL
pub const DEFAULT_API_URL: &str = "http://localhost:8080/api";

/// Consecutive connection failures before the session goes offline
pub const DEFAULT_RECONNECT_MAX_ATTEMPTS: u32 = 5;

/// First reconnection delay in milliseconds
pub const DEFAULT_RECONNECT_BASE_MS: u64 = 1_000;

/// Upper bound on the reconnection delay in milliseconds
pub const DEFAULT_RECONNECT_MAX_MS: u64 = 30_000;

/// How long an outbound notification may wait for a live connection
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 10_000;

/// Connection attempts an outbound notification may witness before failing
pub const DEFAULT_SEND_MAX_ATTEMPTS: u32 = 3;

/// Client heart-beat interval in milliseconds (0 disables)
pub const DEFAULT_HEARTBEAT_MS: u64 = 10_000;

/// Capacity of the transport command and event channels
pub const CHANNEL_CAPACITY: usize = 256;

/// Maximum accepted STOMP frame size in bytes (256 KiB)
pub const MAX_FRAME_SIZE: usize = 262_144;
