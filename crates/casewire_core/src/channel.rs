//! Connection lifecycle for the real-time update channel.
//!
//! ## Architecture
//!
//! The channel owns a background task that holds the WebSocket for its whole
//! life: connect, authenticate via the endpoint URL, replay the durable
//! subscription set, then pump inbound frames into the [`Dispatcher`] while a
//! heartbeat tick keeps the connection alive. On close or error the task
//! destroys the connection and builds a fresh one after a flat delay, up to a
//! bounded number of attempts; once the budget is spent the channel goes
//! dormant until `connect()` is called again (e.g. after an identity change).
//!
//! Reconnection is triggered only by transport close/error. A missed `pong`
//! does not trigger anything; there is no pong-timeout detection.
//!
//! All state the host can observe (connection state, subscription set, update
//! index) lives behind locks shared with the task, so the channel itself can
//! be injected behind an `Arc` and driven from any thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::config::ChannelConfig;
use crate::dispatch::Dispatcher;
use crate::index::{IndexSweeper, UpdateIndex};
use crate::notify::NotificationSink;
use crate::protocol::{Category, InboundMessage, OutboundMessage};
use crate::subscription::{Subscription, SubscriptionRegistry, WILDCARD};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Diagnostic callback invoked with a description of each transport failure.
///
/// Purely informational; recovery is handled by the reconnect loop.
pub type TransportErrorCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Lifecycle state of the channel, readable by host UIs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectionState {
    /// Never connected
    Idle,
    /// Transport connection in progress
    Connecting,
    /// Transport open; frames flow
    Open,
    /// Transport lost; a retry is pending
    Reconnecting {
        /// 1-based retry counter
        attempt: u32,
    },
    /// Retry budget spent; dormant until `connect()` is called again
    GivenUp,
    /// Explicitly torn down by the caller
    Disconnected,
}

/// Real-time update channel: one socket, many subscriptions.
///
/// Constructed once per authenticated session and injected into the host
/// application; there is no ambient singleton. `connect()` arms it,
/// `disconnect()` (or drop) tears it down along with every timer it owns.
pub struct UpdateChannel {
    config: ChannelConfig,
    registry: Arc<SubscriptionRegistry>,
    index: Arc<UpdateIndex>,
    dispatcher: Arc<Dispatcher>,
    state: Arc<RwLock<ConnectionState>>,
    running: Arc<AtomicBool>,
    outgoing_tx: Mutex<Option<mpsc::UnboundedSender<OutboundMessage>>>,
    task_handle: Mutex<Option<JoinHandle<()>>>,
    sweeper: Mutex<Option<IndexSweeper>>,
    on_transport_error: Arc<RwLock<Option<TransportErrorCallback>>>,
}

impl UpdateChannel {
    /// Create a channel for `config`, routing notifications into `sink`.
    ///
    /// Nothing happens until [`connect`](UpdateChannel::connect).
    pub fn new(config: ChannelConfig, sink: Arc<dyn NotificationSink>) -> Self {
        let registry = Arc::new(SubscriptionRegistry::new());
        let index = Arc::new(UpdateIndex::new(config.retention()));
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&index), sink));
        Self {
            config,
            registry,
            index,
            dispatcher,
            state: Arc::new(RwLock::new(ConnectionState::Idle)),
            running: Arc::new(AtomicBool::new(false)),
            outgoing_tx: Mutex::new(None),
            task_handle: Mutex::new(None),
            sweeper: Mutex::new(None),
            on_transport_error: Arc::new(RwLock::new(None)),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state.read().unwrap().clone()
    }

    /// Whether the connection task is armed.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Shared handle to the update index the UI layer reads.
    pub fn index(&self) -> Arc<UpdateIndex> {
        Arc::clone(&self.index)
    }

    /// Shared handle to the durable subscription set.
    pub fn subscriptions(&self) -> Arc<SubscriptionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Register a diagnostic callback for transport failures.
    pub fn on_transport_error(&self, callback: TransportErrorCallback) {
        *self.on_transport_error.write().unwrap() = Some(callback);
    }

    /// Arm the channel.
    ///
    /// A no-op when already armed or while the user id or token is missing.
    /// Must be called from within a tokio runtime: the connection task, the
    /// heartbeat, and the eviction sweep are all spawned here.
    pub fn connect(&self) {
        if !self.config.has_identity() {
            log::warn!("[Channel] connect() ignored: user id or session token not set");
            return;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            log::debug!("[Channel] connect() ignored: already running");
            return;
        }

        let endpoint = match self.config.endpoint() {
            Ok(endpoint) => endpoint,
            Err(e) => {
                log::error!("[Channel] Invalid endpoint: {}", e);
                self.running.store(false, Ordering::SeqCst);
                return;
            }
        };

        set_state(&self.state, ConnectionState::Connecting);

        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        *self.outgoing_tx.lock().unwrap() = Some(outgoing_tx);

        // The sweep task lives exactly as long as the channel is armed.
        {
            let mut sweeper = self.sweeper.lock().unwrap();
            if sweeper.as_ref().map(|s| s.is_finished()).unwrap_or(true) {
                *sweeper = Some(IndexSweeper::spawn(
                    Arc::clone(&self.index),
                    self.config.sweep_interval(),
                ));
            }
        }

        let task = ConnectionTask {
            config: self.config.clone(),
            endpoint,
            registry: Arc::clone(&self.registry),
            dispatcher: Arc::clone(&self.dispatcher),
            state: Arc::clone(&self.state),
            running: Arc::clone(&self.running),
            on_transport_error: Arc::clone(&self.on_transport_error),
        };
        let handle = tokio::spawn(task.run(outgoing_rx));
        *self.task_handle.lock().unwrap() = Some(handle);
    }

    /// Tear the channel down: cancel the pending reconnect, the heartbeat,
    /// and the eviction sweep, then release the transport. Idempotent.
    pub fn disconnect(&self) {
        self.running.store(false, Ordering::SeqCst);

        // Dropping the sender wakes the task out of its select loop
        self.outgoing_tx.lock().unwrap().take();

        if let Some(handle) = self.task_handle.lock().unwrap().take() {
            handle.abort();
        }
        if let Some(sweeper) = self.sweeper.lock().unwrap().take() {
            sweeper.stop();
        }

        set_state(&self.state, ConnectionState::Disconnected);
        log::info!("[Channel] Disconnected");
    }

    /// Transmit a control message if the transport is open.
    ///
    /// There is no store-and-forward: while not open the message is dropped
    /// with a warning.
    pub fn send(&self, message: OutboundMessage) {
        if self.state() != ConnectionState::Open {
            log::warn!("[Channel] Dropping outbound message while not connected");
            return;
        }
        let tx = self.outgoing_tx.lock().unwrap();
        match tx.as_ref() {
            Some(tx) if tx.send(message).is_ok() => {}
            _ => log::warn!("[Channel] Dropping outbound message: connection task gone"),
        }
    }

    /// Record a subscription (wildcard when `resource_id` is `None`) and,
    /// when connected, tell the server immediately.
    ///
    /// The durable set is updated regardless of connection state; every
    /// recorded pair is replayed after each successful (re)connect.
    pub fn subscribe(&self, category: Category, resource_id: Option<&str>) {
        let subscription = Subscription::new(category, resource_id.unwrap_or(WILDCARD));
        let frame = subscription.to_subscribe();
        if self.registry.add(subscription) {
            log::debug!(
                "[Channel] Recorded subscription {}:{}",
                category,
                resource_id.unwrap_or(WILDCARD)
            );
        }
        self.emit_if_open(frame);
    }

    /// Remove a subscription and, when connected, tell the server
    /// immediately.
    pub fn unsubscribe(&self, category: Category, resource_id: Option<&str>) {
        let subscription = Subscription::new(category, resource_id.unwrap_or(WILDCARD));
        let frame = subscription.to_unsubscribe();
        self.registry.remove(&subscription);
        self.emit_if_open(frame);
    }

    /// Quiet variant of [`send`](UpdateChannel::send) for subscription
    /// traffic, where "not connected yet" is the expected case.
    fn emit_if_open(&self, message: OutboundMessage) {
        if self.state() != ConnectionState::Open {
            return;
        }
        if let Some(ref tx) = *self.outgoing_tx.lock().unwrap() {
            let _ = tx.send(message);
        }
    }
}

impl Drop for UpdateChannel {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.task_handle.lock().unwrap().take() {
            handle.abort();
        }
        // The sweeper aborts itself on drop
    }
}

fn set_state(state: &RwLock<ConnectionState>, next: ConnectionState) {
    let mut current = state.write().unwrap();
    if *current != next {
        log::debug!("[Channel] State {:?} -> {:?}", *current, next);
        *current = next;
    }
}

/// Everything the background task needs, detached from the channel so the
/// channel itself never has to be `'static`.
struct ConnectionTask {
    config: ChannelConfig,
    endpoint: String,
    registry: Arc<SubscriptionRegistry>,
    dispatcher: Arc<Dispatcher>,
    state: Arc<RwLock<ConnectionState>>,
    running: Arc<AtomicBool>,
    on_transport_error: Arc<RwLock<Option<TransportErrorCallback>>>,
}

impl ConnectionTask {
    /// Connect/drive/reconnect until torn down or the retry budget is spent.
    async fn run(self, mut outgoing_rx: mpsc::UnboundedReceiver<OutboundMessage>) {
        let mut attempts: u32 = 0;

        while self.running.load(Ordering::SeqCst) {
            match connect_async(&self.endpoint).await {
                Ok((stream, _)) => {
                    log::info!("[Channel] Connected to {}", self.config.server_url);
                    attempts = 0;
                    set_state(&self.state, ConnectionState::Open);

                    let reason = self.drive(stream, &mut outgoing_rx).await;
                    log::info!("[Channel] Connection ended ({})", reason);
                    if reason == "channel_closed" {
                        // Teardown in progress; the sender is gone
                        return;
                    }
                }
                Err(e) => {
                    log::error!("[Channel] Connection failed: {}", e);
                    self.report_transport_error(&e.to_string());
                }
            }

            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            if attempts >= self.config.max_reconnect_attempts {
                log::error!(
                    "[Channel] Reconnect budget spent after {} attempts, going dormant",
                    attempts
                );
                set_state(&self.state, ConnectionState::GivenUp);
                self.running.store(false, Ordering::SeqCst);
                return;
            }

            attempts += 1;
            set_state(&self.state, ConnectionState::Reconnecting { attempt: attempts });
            log::info!(
                "[Channel] Reconnecting in {:?} (attempt {}/{})",
                self.config.reconnect_delay(),
                attempts,
                self.config.max_reconnect_attempts
            );
            tokio::time::sleep(self.config.reconnect_delay()).await;
        }
    }

    /// Pump one open connection until it ends. Returns the reason the
    /// connection ended, for the reconnect loop's log line.
    async fn drive(
        &self,
        stream: WsStream,
        outgoing_rx: &mut mpsc::UnboundedReceiver<OutboundMessage>,
    ) -> &'static str {
        let (mut write, mut read) = stream.split();

        // Replay the durable subscription set. This is the whole reconnect
        // story: the transport is ephemeral, the registry is not, and the
        // server treats repeated subscribes idempotently.
        let subscriptions = self.registry.snapshot();
        for subscription in &subscriptions {
            match subscription.to_subscribe().encode() {
                Ok(frame) => {
                    if let Err(e) = write.send(Message::Text(frame.into())).await {
                        log::error!("[Channel] Failed to replay subscription: {}", e);
                        self.report_transport_error(&e.to_string());
                        return "error";
                    }
                }
                Err(e) => log::error!("[Channel] Failed to encode subscription: {}", e),
            }
        }
        if !subscriptions.is_empty() {
            log::info!("[Channel] Replayed {} subscriptions", subscriptions.len());
        }

        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval());
        heartbeat.tick().await; // the first tick fires immediately

        while self.running.load(Ordering::SeqCst) {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            // A bad frame costs that frame, never the
                            // connection
                            match InboundMessage::decode(&text) {
                                Ok(inbound) => self.dispatcher.dispatch(inbound),
                                Err(e) => {
                                    log::warn!("[Channel] Dropping malformed frame: {}", e);
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) => {
                            log::info!("[Channel] Connection closed by server");
                            return "closed";
                        }
                        Some(Ok(_)) => {
                            // Binary and transport-level ping/pong frames are
                            // not part of the protocol; tungstenite answers
                            // pings on its own
                        }
                        Some(Err(e)) => {
                            log::error!("[Channel] WebSocket error: {}", e);
                            self.report_transport_error(&e.to_string());
                            return "error";
                        }
                        None => {
                            log::info!("[Channel] Stream ended");
                            return "ended";
                        }
                    }
                }
                outgoing = outgoing_rx.recv() => {
                    match outgoing {
                        Some(message) => {
                            let frame = match message.encode() {
                                Ok(frame) => frame,
                                Err(e) => {
                                    log::error!("[Channel] Failed to encode outbound message: {}", e);
                                    continue;
                                }
                            };
                            if let Err(e) = write.send(Message::Text(frame.into())).await {
                                log::error!("[Channel] Send failed: {}", e);
                                self.report_transport_error(&e.to_string());
                                return "error";
                            }
                        }
                        None => return "channel_closed",
                    }
                }
                _ = heartbeat.tick() => {
                    let frame = match OutboundMessage::Ping.encode() {
                        Ok(frame) => frame,
                        Err(e) => {
                            log::error!("[Channel] Failed to encode ping: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = write.send(Message::Text(frame.into())).await {
                        log::error!("[Channel] Failed to send ping: {}", e);
                        self.report_transport_error(&e.to_string());
                        return "ping_failed";
                    }
                }
            }
        }

        "stopped"
    }

    fn report_transport_error(&self, detail: &str) {
        if let Some(ref callback) = *self.on_transport_error.read().unwrap() {
            callback(detail);
        }
    }
}
