//! [`FoxgloveServer`] – server side of the `foxglove.websocket.v1` protocol.
//!
//! Only the subset the bridge needs is spoken:
//!
//! | Direction | Message |
//! |---|---|
//! | server → client | `serverInfo` on connect, `advertise`, `unadvertise` (JSON text frames) |
//! | server → client | message data (binary: `0x01`, subscription id u32 LE, timestamp u64 LE, payload) |
//! | client → server | `subscribe`, `unsubscribe` |
//!
//! Demand is tracked per channel across all clients: the first subscription
//! raises [`SubscriptionEvent::Subscribed`], and losing the last one (by
//! unsubscribing or disconnecting) raises [`SubscriptionEvent::Unsubscribed`].
//! Unknown client operations are ignored.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use foxbridge_types::BridgeError;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{accept_hdr_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::endpoint::{ChannelDescriptor, ChannelId, PubSubEndpoint, SubscriptionEvent};

/// WebSocket subprotocol negotiated with Foxglove clients.
pub const SUBPROTOCOL: &str = "foxglove.websocket.v1";

/// Default listening port.
pub const DEFAULT_PORT: u16 = 8765;

const MESSAGE_DATA_OPCODE: u8 = 0x01;

// ─────────────────────────────────────────────────────────────────────────────
// Wire messages
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(tag = "op", rename_all = "camelCase", rename_all_fields = "camelCase")]
enum ServerMessage<'a> {
    ServerInfo {
        name: &'a str,
        capabilities: Vec<&'a str>,
        supported_encodings: Vec<&'a str>,
        metadata: BTreeMap<String, String>,
        session_id: &'a str,
    },
    Advertise {
        channels: Vec<AdvertisedChannel<'a>>,
    },
    Unadvertise {
        channel_ids: Vec<ChannelId>,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AdvertisedChannel<'a> {
    id: ChannelId,
    topic: &'a str,
    encoding: &'a str,
    schema_name: &'a str,
    schema: &'a str,
    schema_encoding: &'a str,
}

impl<'a> AdvertisedChannel<'a> {
    fn new(id: ChannelId, channel: &'a ChannelDescriptor) -> Self {
        Self {
            id,
            topic: &channel.topic,
            encoding: channel.encoding.as_str(),
            schema_name: &channel.schema_name,
            schema: &channel.schema,
            schema_encoding: channel.schema_encoding.as_str(),
        }
    }
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "camelCase", rename_all_fields = "camelCase")]
enum ClientMessage {
    Subscribe { subscriptions: Vec<Subscription> },
    Unsubscribe { subscription_ids: Vec<u32> },
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct Subscription {
    id: u32,
    channel_id: ChannelId,
}

fn text(msg: &ServerMessage<'_>) -> Option<Message> {
    match serde_json::to_string(msg) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            error!(error = %e, "server message not serializable");
            None
        }
    }
}

/// Binary message-data frame.
fn message_data(subscription: u32, timestamp_ns: u64, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(1 + 4 + 8 + payload.len());
    frame.push(MESSAGE_DATA_OPCODE);
    frame.extend_from_slice(&subscription.to_le_bytes());
    frame.extend_from_slice(&timestamp_ns.to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared server state
// ─────────────────────────────────────────────────────────────────────────────

struct Client {
    outbound: mpsc::UnboundedSender<Message>,
    /// subscription id → channel id
    subscriptions: HashMap<u32, ChannelId>,
}

#[derive(Default)]
struct Registry {
    next_channel: ChannelId,
    channels: BTreeMap<ChannelId, ChannelDescriptor>,
    clients: HashMap<u64, Client>,
    /// Subscriptions per channel across all clients.
    demand: HashMap<ChannelId, usize>,
}

struct Shared {
    name: String,
    session_id: String,
    registry: Mutex<Registry>,
    events: mpsc::UnboundedSender<SubscriptionEvent>,
    next_client: AtomicU64,
    closed: AtomicBool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_open(&self) -> Result<(), BridgeError> {
        if self.closed.load(Ordering::Acquire) {
            Err(BridgeError::EndpointClosed)
        } else {
            Ok(())
        }
    }

    /// Register a client and queue its greeting: `serverInfo`, then every
    /// current channel.
    fn connect(&self, outbound: mpsc::UnboundedSender<Message>) -> u64 {
        let id = self.next_client.fetch_add(1, Ordering::Relaxed);
        let mut registry = self.lock();

        let info = ServerMessage::ServerInfo {
            name: &self.name,
            capabilities: Vec::new(),
            supported_encodings: Vec::new(),
            metadata: BTreeMap::new(),
            session_id: &self.session_id,
        };
        let advertise = ServerMessage::Advertise {
            channels: registry
                .channels
                .iter()
                .map(|(id, c)| AdvertisedChannel::new(*id, c))
                .collect(),
        };
        for msg in [text(&info), text(&advertise)].into_iter().flatten() {
            let _ = outbound.send(msg);
        }

        registry.clients.insert(
            id,
            Client {
                outbound,
                subscriptions: HashMap::new(),
            },
        );
        id
    }

    fn disconnect(&self, client: u64) {
        let mut registry = self.lock();
        let Some(gone) = registry.clients.remove(&client) else {
            return;
        };
        for channel in gone.subscriptions.into_values() {
            self.release(&mut registry, channel);
        }
    }

    fn handle_client_message(&self, client: u64, text: &str) {
        let msg = match serde_json::from_str::<ClientMessage>(text) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(client, error = %e, "ignoring client message");
                return;
            }
        };
        let mut guard = self.lock();
        let registry = &mut *guard;
        match msg {
            ClientMessage::Subscribe { subscriptions } => {
                for sub in subscriptions {
                    if !registry.channels.contains_key(&sub.channel_id) {
                        debug!(client, channel_id = sub.channel_id, "subscribe to unknown channel");
                        continue;
                    }
                    let Some(state) = registry.clients.get_mut(&client) else {
                        return;
                    };
                    if state.subscriptions.contains_key(&sub.id) {
                        debug!(client, subscription = sub.id, "duplicate subscription id");
                        continue;
                    }
                    state.subscriptions.insert(sub.id, sub.channel_id);
                    let count = registry.demand.entry(sub.channel_id).or_default();
                    *count += 1;
                    if *count == 1 {
                        let _ = self.events.send(SubscriptionEvent::Subscribed(sub.channel_id));
                    }
                }
            }
            ClientMessage::Unsubscribe { subscription_ids } => {
                for sub in subscription_ids {
                    let channel = registry
                        .clients
                        .get_mut(&client)
                        .and_then(|state| state.subscriptions.remove(&sub));
                    if let Some(channel) = channel {
                        self.release(registry, channel);
                    }
                }
            }
        }
    }

    /// Drop one unit of demand on `channel`.
    fn release(&self, registry: &mut Registry, channel: ChannelId) {
        let Some(count) = registry.demand.get_mut(&channel) else {
            return;
        };
        *count = count.saturating_sub(1);
        if *count == 0 {
            registry.demand.remove(&channel);
            if registry.channels.contains_key(&channel) {
                let _ = self.events.send(SubscriptionEvent::Unsubscribed(channel));
            }
        }
    }

    fn broadcast(registry: &Registry, msg: &Message) {
        for client in registry.clients.values() {
            let _ = client.outbound.send(msg.clone());
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// FoxgloveServer
// ─────────────────────────────────────────────────────────────────────────────

/// A Foxglove WebSocket server acting as a [`PubSubEndpoint`].
///
/// # Example
///
/// ```rust,no_run
/// use foxbridge_middleware::FoxgloveServer;
///
/// #[tokio::main]
/// async fn main() {
///     let (server, mut events) = FoxgloveServer::bind(8765).await.unwrap();
///     println!("serving on {}", server.local_addr());
///     while let Some(event) = events.recv().await {
///         println!("{event:?}");
///     }
/// }
/// ```
pub struct FoxgloveServer {
    shared: Arc<Shared>,
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl FoxgloveServer {
    /// Bind `0.0.0.0:port` (port `0` picks a free one) and start accepting
    /// clients.  Subscription events arrive on the returned receiver.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Endpoint`] if the listener cannot be bound.
    pub async fn bind(port: u16) -> Result<(Self, mpsc::UnboundedReceiver<SubscriptionEvent>), BridgeError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| BridgeError::Endpoint(format!("bind error on {addr}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| BridgeError::Endpoint(format!("local address: {e}")))?;

        let (events, events_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            name: "foxbridge".to_string(),
            session_id: Uuid::new_v4().to_string(),
            registry: Mutex::new(Registry {
                next_channel: 1,
                ..Registry::default()
            }),
            events,
            next_client: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        });

        let accept_task = tokio::spawn(accept_loop(listener, Arc::clone(&shared)));
        info!(addr = %local_addr, "foxglove server listening");
        Ok((
            Self {
                shared,
                local_addr,
                accept_task,
            },
            events_rx,
        ))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn client_count(&self) -> usize {
        self.shared.lock().clients.len()
    }
}

#[async_trait]
impl PubSubEndpoint for FoxgloveServer {
    async fn add_channel(&self, channel: ChannelDescriptor) -> Result<ChannelId, BridgeError> {
        self.shared.ensure_open()?;
        let mut registry = self.shared.lock();
        let id = registry.next_channel;
        registry.next_channel += 1;
        let advertise = ServerMessage::Advertise {
            channels: vec![AdvertisedChannel::new(id, &channel)],
        };
        if let Some(msg) = text(&advertise) {
            Shared::broadcast(&registry, &msg);
        }
        debug!(channel_id = id, topic = %channel.topic, "advertised");
        registry.channels.insert(id, channel);
        Ok(id)
    }

    async fn remove_channel(&self, id: ChannelId) -> Result<(), BridgeError> {
        self.shared.ensure_open()?;
        let mut registry = self.shared.lock();
        if registry.channels.remove(&id).is_none() {
            return Ok(());
        }
        registry.demand.remove(&id);
        for client in registry.clients.values_mut() {
            client.subscriptions.retain(|_, channel| *channel != id);
        }
        let unadvertise = ServerMessage::Unadvertise { channel_ids: vec![id] };
        if let Some(msg) = text(&unadvertise) {
            Shared::broadcast(&registry, &msg);
        }
        debug!(channel_id = id, "unadvertised");
        Ok(())
    }

    async fn send_message(&self, id: ChannelId, timestamp_ns: u64, payload: &[u8]) -> Result<(), BridgeError> {
        self.shared.ensure_open()?;
        let registry = self.shared.lock();
        for client in registry.clients.values() {
            for (&subscription, _) in client.subscriptions.iter().filter(|(_, c)| **c == id) {
                let frame = message_data(subscription, timestamp_ns, payload);
                let _ = client.outbound.send(Message::Binary(frame.into()));
            }
        }
        Ok(())
    }

    async fn shutdown(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.accept_task.abort();
        // Dropping the outbound senders ends every connection task.
        let mut registry = self.shared.lock();
        registry.clients.clear();
        registry.demand.clear();
        info!(addr = %self.local_addr, "foxglove server stopped");
    }
}

impl Drop for FoxgloveServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Connection handling
// ─────────────────────────────────────────────────────────────────────────────

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let shared = Arc::clone(&shared);
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, peer, shared).await {
                        warn!(peer = %peer, error = %e, "foxglove client error");
                    }
                });
            }
            Err(e) => error!(error = %e, "accept error"),
        }
    }
}

/// Echo the Foxglove subprotocol back when the client asked for it.
fn negotiate(req: &Request, mut response: Response) -> Result<Response, ErrorResponse> {
    let offered = req
        .headers()
        .get_all("Sec-WebSocket-Protocol")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|p| p.trim() == SUBPROTOCOL);
    if offered {
        response
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", HeaderValue::from_static(SUBPROTOCOL));
    }
    Ok(response)
}

async fn handle_client(stream: TcpStream, peer: SocketAddr, shared: Arc<Shared>) -> Result<(), BridgeError> {
    let ws_stream = accept_hdr_async(stream, negotiate)
        .await
        .map_err(|e| BridgeError::Endpoint(format!("ws handshake from {peer}: {e}")))?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let (outbound, mut outbound_rx) = mpsc::unbounded_channel();
    let client = shared.connect(outbound);
    info!(peer = %peer, client, "foxglove client connected");

    loop {
        tokio::select! {
            // ── Downstream: server → client ─────────────────────────────────
            msg = outbound_rx.recv() => {
                match msg {
                    Some(msg) => {
                        if ws_tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            // ── Upstream: client → server ───────────────────────────────────
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => shared.handle_client_message(client, text.as_str()),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    shared.disconnect(client);
    info!(peer = %peer, client, "foxglove client disconnected");
    Ok(())
}
