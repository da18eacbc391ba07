//! Broker connection task with tokio mpsc command/event pattern.
//!
//! One task per session owns the physical link, the reconnection policy, the
//! subscription registry and the queue of outbound sends waiting for a
//! connection. Callers talk to it through a cloneable [`TransportHandle`];
//! everything the task observes leaves on a single ordered event channel.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use carillon_shared::constants::{
    CHANNEL_CAPACITY, DEFAULT_BROKER_URL, DEFAULT_HEARTBEAT_MS, DEFAULT_SEND_MAX_ATTEMPTS,
    DEFAULT_SEND_TIMEOUT_MS,
};
use carillon_shared::credentials::CredentialSource;
use carillon_shared::error::{DeliveryError, NetError};
use carillon_shared::protocol::Notification;
use carillon_shared::types::{ConnectionState, Credentials, UserId};

use crate::frame::{Command, Frame};
use crate::reconnect::{Decision, ReconnectionPolicy, RetryPolicy};
use crate::subscriptions::{SubscriptionRegistry, TopicHandler};
use crate::transport::{broker_host, handshake, Connector, Link};

// ---------------------------------------------------------------------------
// Command / event types
// ---------------------------------------------------------------------------

/// Commands sent *into* the transport task.
#[derive(Debug)]
pub enum TransportCommand {
    /// Start a session, or join the one in progress.
    Connect,
    /// Close the link and stop retrying. `done` fires once torn down.
    Deactivate { done: Option<oneshot::Sender<()>> },
    /// The credential source changed. The transport adopts whatever
    /// identity it now returns.
    CredentialsChanged,
    /// Raw SEND; fails unless connected.
    Publish {
        destination: String,
        payload: Vec<u8>,
        headers: Vec<(String, String)>,
        reply: oneshot::Sender<Result<(), NetError>>,
    },
    /// SEND now, or queue until connected.
    Send {
        destination: String,
        payload: Vec<u8>,
        reply: oneshot::Sender<Result<Delivery, DeliveryError>>,
    },
    /// Raw subscription for the current connection.
    Subscribe {
        destination: String,
        handler: Arc<dyn TopicHandler>,
        reply: oneshot::Sender<Result<String, NetError>>,
    },
    Unsubscribe(String),
    /// Deactivate and stop the task.
    Shutdown,
}

/// Events sent *from* the transport task, in the order they happened.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    StateChanged(ConnectionState),
    /// A routed inbound payload.
    Notification {
        destination: String,
        notification: Notification,
    },
    /// Reconnection gave up; the session stays offline until `connect`.
    Terminal { attempts: u32 },
}

/// How an outbound send reached the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Written on a live link.
    Immediate,
    /// Queued while offline and flushed after reconnecting.
    Replayed { waited: Duration },
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Broker URL handed to the connector.
    pub endpoint: String,
    pub reconnect: RetryPolicy,
    /// Longest a queued send may wait for a connection.
    pub send_timeout: Duration,
    /// Only `max_attempts` is used: failed connection attempts a queued
    /// send may witness.
    pub send_retry: RetryPolicy,
    /// Requested heart-beat interval, zero disables.
    pub heartbeat: Duration,
    pub channel_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_BROKER_URL.to_string(),
            reconnect: RetryPolicy::default(),
            send_timeout: Duration::from_millis(DEFAULT_SEND_TIMEOUT_MS),
            send_retry: RetryPolicy::new(DEFAULT_SEND_MAX_ATTEMPTS, Duration::ZERO),
            heartbeat: Duration::from_millis(DEFAULT_HEARTBEAT_MS),
            channel_capacity: CHANNEL_CAPACITY,
        }
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Cloneable access to a running transport task.
#[derive(Debug, Clone)]
pub struct TransportHandle {
    commands: mpsc::Sender<TransportCommand>,
    state: watch::Receiver<ConnectionState>,
}

impl TransportHandle {
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Request a connection. Joins an attempt already in progress.
    pub async fn connect(&self) -> Result<(), NetError> {
        self.command(TransportCommand::Connect).await
    }

    /// Fire-and-forget SEND on the live link.
    pub async fn publish(
        &self,
        destination: &str,
        payload: Vec<u8>,
        headers: Vec<(String, String)>,
    ) -> Result<(), NetError> {
        let (reply, rx) = oneshot::channel();
        self.command(TransportCommand::Publish {
            destination: destination.to_string(),
            payload,
            headers,
            reply,
        })
        .await?;
        rx.await.map_err(|_| NetError::Closed)?
    }

    /// SEND with queue-and-replay while offline.
    pub(crate) async fn submit(
        &self,
        destination: &str,
        payload: Vec<u8>,
    ) -> Result<Delivery, DeliveryError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(TransportCommand::Send {
                destination: destination.to_string(),
                payload,
                reply,
            })
            .await
            .map_err(|_| DeliveryError::NotConnected)?;
        rx.await.map_err(|_| DeliveryError::Cancelled)?
    }

    /// Subscribe to a raw destination for the current connection.
    pub async fn subscribe(
        &self,
        destination: &str,
        handler: impl TopicHandler,
    ) -> Result<SubscriptionHandle, NetError> {
        let (reply, rx) = oneshot::channel();
        self.command(TransportCommand::Subscribe {
            destination: destination.to_string(),
            handler: Arc::new(handler),
            reply,
        })
        .await?;
        let id = rx.await.map_err(|_| NetError::Closed)??;
        Ok(SubscriptionHandle {
            id,
            commands: self.commands.clone(),
        })
    }

    /// Close the link, cancel retries and pending sends. Returns once the
    /// task has torn everything down.
    pub async fn deactivate(&self) -> Result<(), NetError> {
        let (done, rx) = oneshot::channel();
        self.command(TransportCommand::Deactivate { done: Some(done) })
            .await?;
        rx.await.map_err(|_| NetError::Closed)
    }

    pub async fn credentials_changed(&self) -> Result<(), NetError> {
        self.command(TransportCommand::CredentialsChanged).await
    }

    pub async fn shutdown(&self) -> Result<(), NetError> {
        self.command(TransportCommand::Shutdown).await
    }

    async fn command(&self, command: TransportCommand) -> Result<(), NetError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| NetError::Closed)
    }
}

/// Handle to a raw subscription. Unsubscribing after the connection it was
/// made on is gone does nothing.
#[derive(Debug)]
pub struct SubscriptionHandle {
    id: String,
    commands: mpsc::Sender<TransportCommand>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn unsubscribe(self) {
        let _ = self
            .commands
            .send(TransportCommand::Unsubscribe(self.id))
            .await;
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// Spawn the transport task.
///
/// Returns the command handle and the ordered event receiver. The task stops
/// on [`TransportHandle::shutdown`] or once every handle is dropped.
pub fn spawn_transport(
    connector: Arc<dyn Connector>,
    credentials: Arc<dyn CredentialSource>,
    registry: SubscriptionRegistry,
    config: TransportConfig,
) -> (TransportHandle, mpsc::Receiver<TransportEvent>) {
    let capacity = config.channel_capacity.max(1);
    let (cmd_tx, cmd_rx) = mpsc::channel::<TransportCommand>(capacity);
    let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(capacity);
    let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);

    let task = TransportTask {
        host: broker_host(&config.endpoint),
        policy: ReconnectionPolicy::new(config.reconnect.clone()),
        connector,
        credentials,
        registry,
        config,
        state_tx,
        events: event_tx,
        link: None,
        connecting: None,
        retry_at: None,
        heartbeat: None,
        pending: VecDeque::new(),
        identity: None,
    };
    tokio::spawn(task.run(cmd_rx));

    (
        TransportHandle {
            commands: cmd_tx,
            state: state_rx,
        },
        event_rx,
    )
}

type ConnectFuture = BoxFuture<'static, Result<(Link, Option<Duration>), NetError>>;

struct PendingOutbound {
    destination: String,
    payload: Vec<u8>,
    enqueued_at: Instant,
    deadline: Instant,
    /// Failed connection attempts witnessed while queued.
    attempt_count: u32,
    reply: oneshot::Sender<Result<Delivery, DeliveryError>>,
}

impl PendingOutbound {
    fn resolve(self, result: Result<Delivery, DeliveryError>) {
        if let Err(e) = &result {
            warn!(destination = %self.destination, error = %e, "Outbound send failed");
        }
        let _ = self.reply.send(result);
    }
}

enum Step {
    Command(Option<TransportCommand>),
    Connected(Result<(Link, Option<Duration>), NetError>),
    Inbound(Option<Frame>),
    Retry,
    Deadline,
    Heartbeat,
}

struct TransportTask {
    connector: Arc<dyn Connector>,
    credentials: Arc<dyn CredentialSource>,
    registry: SubscriptionRegistry,
    config: TransportConfig,
    host: String,
    policy: ReconnectionPolicy,
    state_tx: watch::Sender<ConnectionState>,
    events: mpsc::Sender<TransportEvent>,
    /// The only physical link. At most one exists at any time.
    link: Option<Link>,
    connecting: Option<ConnectFuture>,
    retry_at: Option<Instant>,
    heartbeat: Option<Interval>,
    pending: VecDeque<PendingOutbound>,
    /// User the first connect was made for. Only a credential change may
    /// move the transport to another user.
    identity: Option<UserId>,
}

impl TransportTask {
    async fn run(mut self, mut commands: mpsc::Receiver<TransportCommand>) {
        loop {
            let deadline = self.pending.iter().map(|p| p.deadline).min();

            let step = tokio::select! {
                biased;

                // --- Incoming commands ---
                cmd = commands.recv() => Step::Command(cmd),

                // --- Connect attempt completion ---
                result = wait_connecting(&mut self.connecting) => Step::Connected(result),

                // --- Broker frames ---
                frame = recv_frame(&mut self.link) => Step::Inbound(frame),

                // --- Timers ---
                _ = sleep_until(self.retry_at) => Step::Retry,
                _ = sleep_until(deadline) => Step::Deadline,
                _ = tick(&mut self.heartbeat) => Step::Heartbeat,
            };

            match step {
                Step::Command(Some(TransportCommand::Shutdown)) => {
                    info!("Transport shutdown requested");
                    self.deactivate().await;
                    break;
                }
                Step::Command(Some(cmd)) => self.on_command(cmd).await,
                Step::Command(None) => {
                    info!("Command channel closed, shutting down transport");
                    self.deactivate().await;
                    break;
                }
                Step::Connected(result) => {
                    self.connecting = None;
                    match result {
                        Ok((link, heartbeat)) => self.on_connected(link, heartbeat).await,
                        Err(e) => {
                            warn!(endpoint = %self.config.endpoint, error = %e, "Connect attempt failed");
                            self.on_failure().await;
                        }
                    }
                }
                Step::Inbound(Some(frame)) => self.on_frame(frame).await,
                Step::Inbound(None) => {
                    info!("Broker link lost");
                    self.on_failure().await;
                }
                Step::Retry => {
                    self.retry_at = None;
                    self.on_retry().await;
                }
                Step::Deadline => self.expire_pending(),
                Step::Heartbeat => {
                    if let Some(link) = &self.link {
                        if !link.try_heartbeat() {
                            debug!("Heart-beat skipped, link busy");
                        }
                    }
                }
            }
        }

        info!("Transport task terminated");
    }

    // --- Commands ---

    async fn on_command(&mut self, cmd: TransportCommand) {
        match cmd {
            TransportCommand::Connect => self.request_connect().await,

            TransportCommand::Deactivate { done } => {
                self.deactivate().await;
                if let Some(done) = done {
                    let _ = done.send(());
                }
            }

            TransportCommand::CredentialsChanged => {
                info!("Credentials changed, restarting session");
                self.close_link();
                self.reject_pending(DeliveryError::Cancelled);
                self.policy.reset();
                self.identity = None;
                self.publish_state().await;
                self.request_connect().await;
            }

            TransportCommand::Publish {
                destination,
                payload,
                headers,
                reply,
            } => {
                if let Some(e) = self.unavailable() {
                    let _ = reply.send(Err(e));
                    return;
                }
                let mut frame = Frame::send(&destination, payload);
                frame.headers.extend(headers);
                if self.write(frame).await {
                    let _ = reply.send(Ok(()));
                } else {
                    let _ = reply.send(Err(NetError::NotConnected));
                    self.on_failure().await;
                }
            }

            TransportCommand::Send {
                destination,
                payload,
                reply,
            } => self.on_send(destination, payload, reply).await,

            TransportCommand::Subscribe {
                destination,
                handler,
                reply,
            } => {
                if let Some(e) = self.unavailable() {
                    let _ = reply.send(Err(e));
                    return;
                }
                let (id, frame) = self.registry.add_adhoc(&destination, handler);
                if self.write(frame).await {
                    debug!(id = %id, destination = %destination, "Ad-hoc subscription added");
                    let _ = reply.send(Ok(id));
                } else {
                    let _ = reply.send(Err(NetError::NotConnected));
                    self.on_failure().await;
                }
            }

            TransportCommand::Unsubscribe(id) => {
                if let Some(frame) = self.registry.remove(&id) {
                    debug!(id = %id, "Unsubscribing");
                    self.write(frame).await;
                }
            }

            TransportCommand::Shutdown => {}
        }
    }

    async fn on_send(
        &mut self,
        destination: String,
        payload: Vec<u8>,
        reply: oneshot::Sender<Result<Delivery, DeliveryError>>,
    ) {
        match self.policy.state() {
            ConnectionState::Connected => {
                if self.write(Frame::send(&destination, payload.clone())).await {
                    debug!(destination = %destination, "Outbound sent");
                    let _ = reply.send(Ok(Delivery::Immediate));
                    return;
                }
                self.enqueue(destination, payload, reply);
                self.on_failure().await;
            }
            ConnectionState::Failed { attempts } => {
                debug!(attempts, "Send refused, session is offline");
                let _ = reply.send(Err(DeliveryError::NotConnected));
            }
            ConnectionState::Idle
            | ConnectionState::Connecting
            | ConnectionState::Reconnecting { .. } => {
                self.enqueue(destination, payload, reply);
                self.request_connect().await;
            }
        }
    }

    fn enqueue(
        &mut self,
        destination: String,
        payload: Vec<u8>,
        reply: oneshot::Sender<Result<Delivery, DeliveryError>>,
    ) {
        let now = Instant::now();
        debug!(destination = %destination, queued = self.pending.len() + 1, "Outbound queued until connected");
        self.pending.push_back(PendingOutbound {
            destination,
            payload,
            enqueued_at: now,
            deadline: now + self.config.send_timeout,
            attempt_count: 0,
            reply,
        });
    }

    // --- Connection lifecycle ---

    async fn request_connect(&mut self) {
        if self.credentials.credentials().is_none() {
            warn!("No credentials available, not connecting");
            self.reject_pending(DeliveryError::NotConnected);
            return;
        }

        match self.policy.request_connect() {
            Decision::Connect => {
                self.publish_state().await;
                self.start_connect().await;
            }
            _ => debug!(state = %self.policy.state(), "Connect joined existing session"),
        }
    }

    async fn on_retry(&mut self) {
        if self.credentials.credentials().is_none() {
            warn!("Credentials gone before retry, going idle");
            self.policy.reset();
            self.reject_pending(DeliveryError::NotConnected);
            self.publish_state().await;
            return;
        }
        self.start_connect().await;
    }

    async fn start_connect(&mut self) {
        let Some(credentials) = self.credentials.credentials() else {
            return;
        };

        if let Some(bound) = self.identity.filter(|bound| *bound != credentials.user_id) {
            warn!(
                bound = %bound,
                current = %credentials.user_id,
                "Credentials name another user, not connecting"
            );
            self.close_link();
            self.reject_pending(DeliveryError::NotConnected);
            self.policy.reset();
            self.publish_state().await;
            return;
        }
        self.identity = Some(credentials.user_id);

        // Never two links: anything left over is closed first.
        self.link = None;
        self.heartbeat = None;
        self.retry_at = None;
        self.registry.bind(credentials.user_id);

        info!(
            endpoint = %self.config.endpoint,
            user_id = %credentials.user_id,
            state = %self.policy.state(),
            "Connecting to broker"
        );
        self.connecting = Some(connect_future(
            Arc::clone(&self.connector),
            self.config.endpoint.clone(),
            self.host.clone(),
            credentials,
            self.config.heartbeat,
        ));
    }

    async fn on_connected(&mut self, link: Link, heartbeat: Option<Duration>) {
        self.link = Some(link);

        // Subscriptions go out before anything else is read from the link.
        for frame in self.registry.activate() {
            if !self.write(frame).await {
                self.on_failure().await;
                return;
            }
        }

        self.policy.on_connected();
        self.heartbeat = heartbeat.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        info!(
            subscriptions = self.registry.active_count(),
            heartbeat_ms = heartbeat.map(|d| d.as_millis() as u64).unwrap_or(0),
            "Connected to broker"
        );
        self.publish_state().await;

        if !self.flush_pending().await {
            self.on_failure().await;
        }
    }

    /// Replay queued sends in FIFO order. Returns `false` if the link broke.
    async fn flush_pending(&mut self) -> bool {
        while let Some(pending) = self.pending.pop_front() {
            let frame = Frame::send(&pending.destination, pending.payload.clone());
            if !self.write(frame).await {
                self.pending.push_front(pending);
                return false;
            }
            let waited = pending.enqueued_at.elapsed();
            debug!(destination = %pending.destination, waited_ms = waited.as_millis() as u64, "Queued send replayed");
            pending.resolve(Ok(Delivery::Replayed { waited }));
        }
        true
    }

    async fn on_failure(&mut self) {
        self.link = None;
        self.heartbeat = None;
        self.connecting = None;
        self.registry.clear_active();

        match self.policy.on_failure() {
            Decision::RetryAfter(delay) => {
                self.retry_at = Some(Instant::now() + delay);
                self.age_pending();
                self.publish_state().await;
            }
            Decision::GiveUp { attempts } => {
                self.retry_at = None;
                error!(attempts, "Giving up on the broker, session offline");
                self.publish_state().await;
                self.emit(TransportEvent::Terminal { attempts }).await;
                self.reject_pending(DeliveryError::NotConnected);
            }
            Decision::Connect | Decision::Join | Decision::Ignore => {}
        }
    }

    async fn deactivate(&mut self) {
        self.close_link();
        self.reject_pending(DeliveryError::Cancelled);
        self.policy.reset();
        self.publish_state().await;
    }

    /// Best-effort UNSUBSCRIBE + DISCONNECT, then drop the link, the
    /// in-flight connect and every timer.
    fn close_link(&mut self) {
        let unsubscribes = self.registry.deactivate();
        if let Some(link) = self.link.take() {
            for frame in unsubscribes {
                link.try_send(frame);
            }
            link.try_send(Frame::disconnect());
            debug!("Broker link closed");
        }
        if self.connecting.take().is_some() {
            debug!("In-flight connect cancelled");
        }
        if self.retry_at.take().is_some() {
            debug!("Scheduled retry cancelled");
        }
        self.heartbeat = None;
    }

    // --- Inbound ---

    async fn on_frame(&mut self, frame: Frame) {
        match frame.command {
            Command::Message => match self.registry.route(&frame) {
                Ok((destination, notification)) => {
                    debug!(
                        destination = %destination,
                        id = %notification.id,
                        kind = ?notification.kind,
                        "Notification received"
                    );
                    self.emit(TransportEvent::Notification {
                        destination,
                        notification,
                    })
                    .await;
                }
                Err(e) => warn!(frame = %frame, error = %e, "Dropping inbound payload"),
            },
            Command::Error => {
                warn!(
                    message = frame.get("message").unwrap_or("?"),
                    "Broker sent ERROR, dropping link"
                );
                self.on_failure().await;
            }
            Command::Receipt => {
                debug!(receipt = frame.get("receipt-id").unwrap_or("?"), "Receipt");
            }
            other => debug!(command = %other, "Ignoring unexpected frame"),
        }
    }

    // --- Pending outbound bookkeeping ---

    fn age_pending(&mut self) {
        let retry = self.config.send_retry.clone();
        let mut kept = VecDeque::with_capacity(self.pending.len());
        for mut pending in self.pending.drain(..) {
            pending.attempt_count += 1;
            if retry.allows(pending.attempt_count) {
                kept.push_back(pending);
            } else {
                let attempts = pending.attempt_count;
                let waited = pending.enqueued_at.elapsed();
                pending.resolve(Err(DeliveryError::DeliveryTimedOut { attempts, waited }));
            }
        }
        self.pending = kept;
    }

    fn expire_pending(&mut self) {
        let now = Instant::now();
        let mut kept = VecDeque::with_capacity(self.pending.len());
        for pending in self.pending.drain(..) {
            if pending.deadline <= now {
                let attempts = pending.attempt_count;
                let waited = now.saturating_duration_since(pending.enqueued_at);
                pending.resolve(Err(DeliveryError::DeliveryTimedOut { attempts, waited }));
            } else {
                kept.push_back(pending);
            }
        }
        self.pending = kept;
    }

    fn reject_pending(&mut self, error: DeliveryError) {
        for pending in self.pending.drain(..) {
            pending.resolve(Err(error.clone()));
        }
    }

    // --- Plumbing ---

    /// Why raw publish/subscribe cannot run right now, if they cannot.
    fn unavailable(&self) -> Option<NetError> {
        match self.policy.state() {
            ConnectionState::Connected => None,
            ConnectionState::Failed { attempts } => Some(NetError::Terminal { attempts }),
            _ => Some(NetError::NotConnected),
        }
    }

    async fn write(&mut self, frame: Frame) -> bool {
        match self.link.as_mut() {
            Some(link) => match link.send(frame).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "Link write failed");
                    false
                }
            },
            None => false,
        }
    }

    async fn publish_state(&mut self) {
        let state = self.policy.state();
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            info!(state = %state, "Connection state changed");
            self.emit(TransportEvent::StateChanged(state)).await;
        }
    }

    async fn emit(&mut self, event: TransportEvent) {
        if self.events.send(event).await.is_err() {
            debug!("Event receiver dropped");
        }
    }
}

fn connect_future(
    connector: Arc<dyn Connector>,
    endpoint: String,
    host: String,
    credentials: Credentials,
    heartbeat: Duration,
) -> ConnectFuture {
    Box::pin(async move {
        let mut link = connector.open(&endpoint, &credentials).await?;
        let negotiated = handshake(&mut link, &host, &credentials, heartbeat).await?;
        Ok((link, negotiated))
    })
}

// Select helpers: each pends forever when its source is absent.

async fn wait_connecting(
    connecting: &mut Option<ConnectFuture>,
) -> Result<(Link, Option<Duration>), NetError> {
    match connecting.as_mut() {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn recv_frame(link: &mut Option<Link>) -> Option<Frame> {
    match link.as_mut() {
        Some(link) => link.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval.as_mut() {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
