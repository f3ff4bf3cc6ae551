//! [`MemoryEndpoint`] – an in-process [`PubSubEndpoint`].
//!
//! Records every call, lets tests raise subscription events by hand, and can
//! be closed to simulate a dropped transport.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use foxbridge_middleware::{ChannelManager, MemoryEndpoint};
//!
//! # #[tokio::main] async fn main() {
//! let (endpoint, events) = MemoryEndpoint::new();
//! let endpoint = Arc::new(endpoint);
//! let manager = ChannelManager::new();
//! manager.open_with(endpoint.clone(), events, Vec::new());
//! assert!(manager.is_open());
//! # }
//! ```

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use foxbridge_types::BridgeError;
use tokio::sync::mpsc;

use crate::endpoint::{ChannelDescriptor, ChannelId, PubSubEndpoint, SubscriptionEvent};

/// One message handed to [`PubSubEndpoint::send_message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub channel: ChannelId,
    pub timestamp_ns: u64,
    pub payload: Vec<u8>,
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: ChannelId,
    channels: BTreeMap<ChannelId, ChannelDescriptor>,
    removed: Vec<ChannelId>,
    sent: Vec<SentMessage>,
    closed: bool,
}

pub struct MemoryEndpoint {
    state: Mutex<MemoryState>,
    events: mpsc::UnboundedSender<SubscriptionEvent>,
}

impl MemoryEndpoint {
    /// Create an endpoint and the receiver its subscription events go to.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SubscriptionEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let endpoint = Self {
            state: Mutex::new(MemoryState {
                next_id: 1,
                ..MemoryState::default()
            }),
            events,
        };
        (endpoint, rx)
    }

    /// Pretend a client subscribed to `id`.
    pub fn subscribe(&self, id: ChannelId) {
        let _ = self.events.send(SubscriptionEvent::Subscribed(id));
    }

    /// Pretend the last client unsubscribed from `id`.
    pub fn unsubscribe(&self, id: ChannelId) {
        let _ = self.events.send(SubscriptionEvent::Unsubscribed(id));
    }

    /// Simulate the transport dying: every later call fails.
    pub fn close(&self) {
        self.lock().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Currently advertised channels.
    pub fn channels(&self) -> BTreeMap<ChannelId, ChannelDescriptor> {
        self.lock().channels.clone()
    }

    /// Id of the advertised channel on `topic`.
    pub fn channel_on(&self, topic: &str) -> Option<ChannelId> {
        self.lock()
            .channels
            .iter()
            .find(|(_, c)| c.topic == topic)
            .map(|(id, _)| *id)
    }

    /// Ids passed to `remove_channel`, in call order.
    pub fn removed(&self) -> Vec<ChannelId> {
        self.lock().removed.clone()
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.lock().sent.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open_state(&self) -> Result<MutexGuard<'_, MemoryState>, BridgeError> {
        let state = self.lock();
        if state.closed {
            Err(BridgeError::EndpointClosed)
        } else {
            Ok(state)
        }
    }
}

#[async_trait]
impl PubSubEndpoint for MemoryEndpoint {
    async fn add_channel(&self, channel: ChannelDescriptor) -> Result<ChannelId, BridgeError> {
        let mut state = self.open_state()?;
        let id = state.next_id;
        state.next_id += 1;
        state.channels.insert(id, channel);
        Ok(id)
    }

    async fn remove_channel(&self, id: ChannelId) -> Result<(), BridgeError> {
        let mut state = self.open_state()?;
        state.channels.remove(&id);
        state.removed.push(id);
        Ok(())
    }

    async fn send_message(&self, id: ChannelId, timestamp_ns: u64, payload: &[u8]) -> Result<(), BridgeError> {
        let mut state = self.open_state()?;
        state.sent.push(SentMessage {
            channel: id,
            timestamp_ns,
            payload: payload.to_vec(),
        });
        Ok(())
    }

    async fn shutdown(&self) {
        self.close();
    }
}
