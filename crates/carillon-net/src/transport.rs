//! Physical links to the broker.
//!
//! A [`Connector`] opens one duplex [`Link`]: a pair of channels carrying
//! decoded frames. The WebSocket implementation spawns a reader and a writer
//! task per connection; dropping the `Link` closes the socket.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace, warn};

use carillon_shared::error::NetError;
use carillon_shared::types::Credentials;

use crate::frame::{negotiate_heartbeat, Command, Frame, Packet};

/// Buffered frames per direction on a WebSocket link.
const LINK_BUFFER: usize = 64;

// ---------------------------------------------------------------------------
// Link
// ---------------------------------------------------------------------------

/// One open connection. Owned exclusively by the transport task.
#[derive(Debug)]
pub struct Link {
    outgoing: mpsc::Sender<Packet>,
    incoming: mpsc::Receiver<Frame>,
}

impl Link {
    pub fn new(outgoing: mpsc::Sender<Packet>, incoming: mpsc::Receiver<Frame>) -> Self {
        Self { outgoing, incoming }
    }

    pub async fn send(&self, frame: Frame) -> Result<(), NetError> {
        self.outgoing
            .send(Packet::Frame(frame))
            .await
            .map_err(|_| NetError::NotConnected)
    }

    /// Queue a frame without waiting. Used on teardown paths that must not
    /// block.
    pub fn try_send(&self, frame: Frame) -> bool {
        self.outgoing.try_send(Packet::Frame(frame)).is_ok()
    }

    pub fn try_heartbeat(&self) -> bool {
        self.outgoing.try_send(Packet::Heartbeat).is_ok()
    }

    /// Next inbound frame, `None` once the remote side closed.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.incoming.recv().await
    }
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

/// Opens physical links to the broker.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn open(&self, endpoint: &str, credentials: &Credentials) -> Result<Link, NetError>;
}

/// Run the STOMP handshake on a freshly opened link.
///
/// Returns the negotiated outgoing heart-beat interval.
pub async fn handshake(
    link: &mut Link,
    host: &str,
    credentials: &Credentials,
    heartbeat: Duration,
) -> Result<Option<Duration>, NetError> {
    link.send(Frame::connect(host, credentials, heartbeat)).await?;

    match link.recv().await {
        Some(frame) if frame.command == Command::Connected => {
            debug!(
                version = frame.get("version").unwrap_or("?"),
                server = frame.get("server").unwrap_or("?"),
                "STOMP session established"
            );
            Ok(negotiate_heartbeat(heartbeat, &frame))
        }
        Some(frame) if frame.command == Command::Error => {
            let reason = frame
                .get("message")
                .map(str::to_string)
                .or_else(|| frame.body_str().map(str::to_string))
                .unwrap_or_else(|| "broker rejected CONNECT".to_string());
            Err(NetError::ConnectFailed(reason))
        }
        Some(frame) => Err(NetError::Protocol(format!(
            "expected CONNECTED, got {}",
            frame.command
        ))),
        None => Err(NetError::ConnectFailed(
            "link closed during handshake".to_string(),
        )),
    }
}

/// Host part of a broker URL, sent as the STOMP `host` header.
pub fn broker_host(endpoint: &str) -> String {
    let without_scheme = endpoint
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(endpoint);
    let authority = without_scheme.split('/').next().unwrap_or(without_scheme);
    let authority = authority.rsplit('@').next().unwrap_or(authority);
    let host = match authority.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => authority,
    };
    host.to_string()
}

// ---------------------------------------------------------------------------
// WebSocket connector
// ---------------------------------------------------------------------------

/// STOMP over WebSocket, one frame per text message.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, endpoint: &str, credentials: &Credentials) -> Result<Link, NetError> {
        let mut request = endpoint
            .into_client_request()
            .map_err(|e| NetError::ConnectFailed(format!("invalid broker URL: {e}")))?;
        let bearer = HeaderValue::from_str(&credentials.bearer())
            .map_err(|e| NetError::ConnectFailed(format!("invalid token: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (socket, response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| NetError::ConnectFailed(e.to_string()))?;

        debug!(
            endpoint = %endpoint,
            status = %response.status(),
            "WebSocket upgraded"
        );

        let (mut sink, mut stream) = socket.split();
        let (out_tx, mut out_rx) = mpsc::channel::<Packet>(LINK_BUFFER);
        let (in_tx, in_rx) = mpsc::channel::<Frame>(LINK_BUFFER);

        // Writer: drains the outgoing queue, closes the socket once the link
        // is dropped.
        tokio::spawn(async move {
            while let Some(packet) = out_rx.recv().await {
                let message = match packet {
                    Packet::Frame(frame) => match String::from_utf8(frame.encode()) {
                        Ok(text) => Message::text(text),
                        Err(e) => Message::binary(e.into_bytes()),
                    },
                    Packet::Heartbeat => Message::text("\n"),
                };
                if let Err(e) = sink.send(message).await {
                    warn!(error = %e, "WebSocket write failed");
                    break;
                }
            }
            let _ = sink.close().await;
            debug!("WebSocket writer stopped");
        });

        // Reader: decodes inbound frames until the socket or the link closes.
        tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                let data = match message {
                    Ok(Message::Text(text)) => text.as_bytes().to_vec(),
                    Ok(Message::Binary(bytes)) => bytes.to_vec(),
                    Ok(Message::Close(reason)) => {
                        debug!(reason = ?reason, "WebSocket closed by broker");
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(error = %e, "WebSocket read failed");
                        break;
                    }
                };

                match Frame::decode(&data) {
                    Ok(Some(frame)) => {
                        if in_tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => trace!("Heart-beat received"),
                    Err(e) => warn!(error = %e, len = data.len(), "Dropping undecodable frame"),
                }
            }
            debug!("WebSocket reader stopped");
        });

        Ok(Link::new(out_tx, in_rx))
    }
}
