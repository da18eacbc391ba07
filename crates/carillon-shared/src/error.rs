use std::time::Duration;

use thiserror::Error;

use crate::types::UserId;

/// Failures of the broker link.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetError {
    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    #[error("Not connected to the broker")]
    NotConnected,

    #[error("Transport task has stopped")]
    Closed,

    #[error("Broker protocol error: {0}")]
    Protocol(String),

    #[error("Gave up reconnecting after {attempts} attempts")]
    Terminal { attempts: u32 },
}

/// An inbound payload that could not be turned into a notification.
/// These are logged and dropped, never fatal to the subscription loop.
#[derive(Error, Debug)]
pub enum RoutingError {
    #[error("Malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Payload addressed to user {actual}, session belongs to {expected}")]
    WrongRecipient { expected: UserId, actual: UserId },

    #[error("No handler for subscription {0}")]
    UnknownSubscription(String),

    #[error("Handler panicked: {0}")]
    HandlerPanicked(String),
}

/// Outcome of an outbound send that did not reach the broker.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("Not connected to the broker")]
    NotConnected,

    #[error("Delivery timed out after {attempts} connection attempts ({waited:?})")]
    DeliveryTimedOut { attempts: u32, waited: Duration },

    #[error("Delivery cancelled: session deactivated")]
    Cancelled,

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// STOMP frame decoding failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Empty frame")]
    Empty,

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Malformed header line: {0}")]
    MalformedHeader(String),

    #[error("Invalid escape sequence in header")]
    InvalidEscape,

    #[error("Frame is not valid UTF-8")]
    InvalidUtf8,

    #[error("Missing NUL terminator")]
    Unterminated,

    #[error("Invalid content-length: {0}")]
    InvalidContentLength(String),

    #[error("Frame too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },
}
