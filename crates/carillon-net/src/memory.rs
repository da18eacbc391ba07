//! In-process broker links.
//!
//! [`MemoryConnector`] hands out [`Link`]s whose far end is a
//! [`BrokerConnection`] the caller drives by hand: complete or reject the
//! handshake, read SUBSCRIBE/SEND frames, push MESSAGE frames, drop it to
//! simulate a lost connection. [`MemoryConnector::spawn_loopback`] instead
//! answers every link as a tiny echo broker, which backs the client's
//! offline mode.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use carillon_shared::error::NetError;
use carillon_shared::types::Credentials;

use crate::frame::{Command, Frame, Packet};
use crate::transport::{Connector, Link};

const MEMORY_LINK_BUFFER: usize = 64;

/// How the connector answers the next `open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptMode {
    Accept,
    /// Fail immediately, like a refused TCP connect.
    Refuse,
    /// Never complete, like an unreachable host.
    Stall,
}

#[derive(Debug)]
struct ConnectorState {
    mode: AcceptMode,
    refuse_next: u32,
    attempts: u32,
    live: Vec<mpsc::WeakSender<Frame>>,
    max_open: usize,
}

impl ConnectorState {
    fn open_links(&mut self) -> usize {
        self.live.retain(|weak| match weak.upgrade() {
            Some(sender) => !sender.is_closed(),
            None => false,
        });
        self.live.len()
    }
}

#[derive(Debug)]
struct Inner {
    state: Mutex<ConnectorState>,
    accepted_tx: mpsc::UnboundedSender<BrokerConnection>,
    accepted_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<BrokerConnection>>,
    message_ids: Arc<AtomicU64>,
}

#[derive(Debug, Clone)]
pub struct MemoryConnector {
    inner: Arc<Inner>,
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryConnector {
    pub fn new() -> Self {
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(ConnectorState {
                    mode: AcceptMode::Accept,
                    refuse_next: 0,
                    attempts: 0,
                    live: Vec::new(),
                    max_open: 0,
                }),
                accepted_tx,
                accepted_rx: tokio::sync::Mutex::new(accepted_rx),
                message_ids: Arc::new(AtomicU64::new(1)),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, ConnectorState> {
        match self.inner.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn set_mode(&self, mode: AcceptMode) {
        self.state().mode = mode;
    }

    /// Refuse the next `count` opens regardless of the mode.
    pub fn refuse_next(&self, count: u32) {
        self.state().refuse_next = count;
    }

    /// Total `open` calls so far.
    pub fn attempts(&self) -> u32 {
        self.state().attempts
    }

    /// Links whose both ends are still alive.
    pub fn open_links(&self) -> usize {
        self.state().open_links()
    }

    /// Highest number of simultaneously open links observed at open time.
    pub fn max_open_links(&self) -> usize {
        self.state().max_open
    }

    /// Wait for the next accepted link.
    pub async fn accept(&self) -> Option<BrokerConnection> {
        self.inner.accepted_rx.lock().await.recv().await
    }

    /// Serve every accepted link as a loopback broker: a SEND to
    /// `/app/<path>` comes back as a MESSAGE on `/topic/<path>` when the
    /// client subscribed to it.
    pub fn spawn_loopback(&self) -> JoinHandle<()> {
        let connector = self.clone();
        tokio::spawn(async move {
            while let Some(broker) = connector.accept().await {
                tokio::spawn(serve_loopback(broker));
            }
        })
    }
}

async fn serve_loopback(mut broker: BrokerConnection) {
    if let Err(e) = broker.complete_handshake().await {
        debug!(error = %e, "Loopback handshake failed");
        return;
    }

    // destination -> subscription id
    let mut subscriptions: HashMap<String, String> = HashMap::new();
    while let Some(frame) = broker.next_frame().await {
        match frame.command {
            Command::Subscribe => {
                if let (Some(id), Some(destination)) = (frame.get("id"), frame.get("destination")) {
                    subscriptions.insert(destination.to_string(), id.to_string());
                }
            }
            Command::Unsubscribe => {
                if let Some(id) = frame.get("id") {
                    subscriptions.retain(|_, sub| sub != id);
                }
            }
            Command::Send => {
                let Some(destination) = frame.get("destination") else {
                    continue;
                };
                let topic = destination.replacen("/app/", "/topic/", 1);
                match subscriptions.get(&topic) {
                    Some(id) => {
                        if broker.push(id, &topic, frame.body).await.is_err() {
                            break;
                        }
                    }
                    None => debug!(destination = %topic, "Loopback message has no subscriber"),
                }
            }
            Command::Disconnect => break,
            _ => {}
        }
    }
    debug!(user = %broker.credentials().user_id, "Loopback link closed");
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open(&self, endpoint: &str, credentials: &Credentials) -> Result<Link, NetError> {
        let mode = {
            let mut state = self.state();
            state.attempts += 1;
            if state.refuse_next > 0 {
                state.refuse_next -= 1;
                AcceptMode::Refuse
            } else {
                state.mode
            }
        };

        match mode {
            AcceptMode::Refuse => {
                debug!(endpoint = %endpoint, "Memory broker refused connection");
                return Err(NetError::ConnectFailed("connection refused".to_string()));
            }
            AcceptMode::Stall => return std::future::pending().await,
            AcceptMode::Accept => {}
        }

        let (out_tx, out_rx) = mpsc::channel(MEMORY_LINK_BUFFER);
        let (in_tx, in_rx) = mpsc::channel(MEMORY_LINK_BUFFER);

        {
            let mut state = self.state();
            state.live.push(in_tx.downgrade());
            let open = state.open_links();
            state.max_open = state.max_open.max(open);
        }

        let connection = BrokerConnection {
            from_client: out_rx,
            to_client: in_tx,
            credentials: credentials.clone(),
            message_ids: Arc::clone(&self.inner.message_ids),
        };
        self.inner
            .accepted_tx
            .send(connection)
            .map_err(|_| NetError::ConnectFailed("memory broker gone".to_string()))?;

        Ok(Link::new(out_tx, in_rx))
    }
}

// ---------------------------------------------------------------------------
// Broker side
// ---------------------------------------------------------------------------

/// Broker end of one memory link. Dropping it closes the client's link.
#[derive(Debug)]
pub struct BrokerConnection {
    from_client: mpsc::Receiver<Packet>,
    to_client: mpsc::Sender<Frame>,
    credentials: Credentials,
    message_ids: Arc<AtomicU64>,
}

impl BrokerConnection {
    /// Credentials presented when the link was opened.
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Next frame or heart-beat from the client. `None` once the client
    /// dropped its link.
    pub async fn next_packet(&mut self) -> Option<Packet> {
        self.from_client.recv().await
    }

    /// Next frame from the client, skipping heart-beats.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            match self.next_packet().await? {
                Packet::Frame(frame) => return Some(frame),
                Packet::Heartbeat => continue,
            }
        }
    }

    /// Frame already queued by the client, if any.
    pub fn try_next_frame(&mut self) -> Option<Frame> {
        loop {
            match self.from_client.try_recv().ok()? {
                Packet::Frame(frame) => return Some(frame),
                Packet::Heartbeat => continue,
            }
        }
    }

    /// Read CONNECT and answer CONNECTED (heart-beats disabled).
    pub async fn complete_handshake(&mut self) -> Result<Frame, NetError> {
        let connect = self.next_frame().await.ok_or(NetError::Closed)?;
        if connect.command != Command::Connect {
            return Err(NetError::Protocol(format!(
                "expected CONNECT, got {}",
                connect.command
            )));
        }
        self.deliver(Frame::connected("0,0")).await?;
        Ok(connect)
    }

    /// Read CONNECT and answer ERROR.
    pub async fn reject_handshake(&mut self, message: &str) -> Result<(), NetError> {
        self.next_frame().await.ok_or(NetError::Closed)?;
        self.deliver(Frame::error(message)).await
    }

    pub async fn deliver(&self, frame: Frame) -> Result<(), NetError> {
        self.to_client
            .send(frame)
            .await
            .map_err(|_| NetError::Closed)
    }

    /// Push a MESSAGE frame for an active subscription.
    pub async fn push(
        &self,
        subscription: &str,
        destination: &str,
        payload: impl Into<Vec<u8>>,
    ) -> Result<(), NetError> {
        let id = self.message_ids.fetch_add(1, Ordering::Relaxed);
        self.deliver(Frame::message(
            subscription,
            destination,
            &format!("msg-{id}"),
            payload,
        ))
        .await
    }

    /// Read `count` SUBSCRIBE frames and return their `(id, destination)`.
    pub async fn expect_subscriptions(
        &mut self,
        count: usize,
    ) -> Result<Vec<(String, String)>, NetError> {
        let mut subscriptions = Vec::with_capacity(count);
        while subscriptions.len() < count {
            let frame = self.next_frame().await.ok_or(NetError::Closed)?;
            if frame.command != Command::Subscribe {
                return Err(NetError::Protocol(format!(
                    "expected SUBSCRIBE, got {}",
                    frame.command
                )));
            }
            subscriptions.push((
                frame.get("id").unwrap_or_default().to_string(),
                frame.get("destination").unwrap_or_default().to_string(),
            ));
        }
        Ok(subscriptions)
    }

    /// Whether the client still holds its end.
    pub fn is_open(&self) -> bool {
        !self.to_client.is_closed()
    }
}
