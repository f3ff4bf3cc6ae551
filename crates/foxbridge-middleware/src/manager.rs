//! [`ChannelManager`] – maps registered sources onto endpoint channels.
//!
//! All channel work happens on one worker task.  Callers (the registry on the
//! tick thread, through [`ChannelSink`]) only enqueue requests, so a tick
//! never waits on the endpoint.  The worker is also the only reader of
//! endpoint subscription events and the only writer of the path ↔ channel
//! map; everyone else sees the map through [`ChannelManager::snapshot`].
//!
//! ```text
//!  registry ──add/remove/dispatch──▶ ┌────────┐ ──advertise/send──▶ endpoint
//!                                    │ worker │
//!  endpoint ──subscribe/unsubscribe─▶└────────┘ ──enable/disable──▶ sources
//! ```
//!
//! Requests are handled strictly in the order they were queued, which keeps
//! every add/remove on the same path in order.
//!
//! # States
//!
//! *Closed* (initially, after [`close`][ChannelManager::close], or after the
//! endpoint died): every request is a no-op.  *Open*: requests flow to the
//! worker.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use foxbridge_sources::{ChannelSink, SourceHandle};
use foxbridge_types::BridgeError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::endpoint::{ChannelDescriptor, ChannelId, PubSubEndpoint, SubscriptionEvent};
use crate::foxglove::FoxgloveServer;

// ─────────────────────────────────────────────────────────────────────────────
// ChannelMap
// ─────────────────────────────────────────────────────────────────────────────

/// The path ↔ channel bijection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelMap {
    by_path: BTreeMap<String, ChannelId>,
    by_id: BTreeMap<ChannelId, String>,
}

impl ChannelMap {
    pub fn channel_of(&self, path: &str) -> Option<ChannelId> {
        self.by_path.get(path).copied()
    }

    pub fn path_of(&self, id: ChannelId) -> Option<&str> {
        self.by_id.get(&id).map(String::as_str)
    }

    pub fn paths(&self) -> Vec<String> {
        self.by_path.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }

    fn insert(&mut self, path: String, id: ChannelId) {
        self.by_id.insert(id, path.clone());
        self.by_path.insert(path, id);
    }

    fn remove_path(&mut self, path: &str) -> Option<ChannelId> {
        let id = self.by_path.remove(path)?;
        self.by_id.remove(&id);
        Some(id)
    }

    fn clear(&mut self) {
        self.by_path.clear();
        self.by_id.clear();
    }

    /// Both directions agree.
    fn is_bijective(&self) -> bool {
        self.by_path.len() == self.by_id.len()
            && self
                .by_path
                .iter()
                .all(|(path, id)| self.by_id.get(id) == Some(path))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Worker
// ─────────────────────────────────────────────────────────────────────────────

enum Command {
    Add(SourceHandle),
    Remove(String),
    Dispatch(HashMap<String, Vec<u8>>),
    Clear,
    Flush(oneshot::Sender<()>),
}

struct Worker {
    endpoint: Arc<dyn PubSubEndpoint>,
    map: ChannelMap,
    handles: HashMap<String, SourceHandle>,
    last_timestamp: u64,
    snapshot: watch::Sender<ChannelMap>,
}

impl Worker {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<SubscriptionEvent>,
    ) {
        let mut events_open = true;
        loop {
            let result = tokio::select! {
                // Subscription changes first, so a flush also covers events
                // raised before it was queued.
                biased;
                event = events.recv(), if events_open => {
                    match event {
                        Some(event) => self.on_subscription(event),
                        None => events_open = false,
                    }
                    Ok(())
                }
                command = commands.recv() => match command {
                    Some(command) => self.apply(command).await,
                    None => break,
                },
            };

            match result {
                Ok(()) => {}
                Err(BridgeError::EndpointClosed) => {
                    warn!(channels = self.map.len(), "endpoint closed; dropping all channels");
                    self.map.clear();
                    self.release_handles();
                    self.snapshot.send_replace(ChannelMap::default());
                    break;
                }
                Err(e) => error!(error = %e, "channel worker error"),
            }
            debug_assert!(self.map.is_bijective());
            self.snapshot.send_if_modified(|current| {
                if *current == self.map {
                    false
                } else {
                    current.clone_from(&self.map);
                    true
                }
            });
        }
        debug!("channel worker stopped");
    }

    async fn apply(&mut self, command: Command) -> Result<(), BridgeError> {
        match command {
            Command::Add(handle) => self.add(handle).await,
            Command::Remove(path) => self.remove(&path).await,
            Command::Dispatch(payloads) => self.dispatch(payloads).await,
            Command::Clear => {
                let paths = self.map.paths();
                for path in paths {
                    self.remove(&path).await?;
                }
                Ok(())
            }
            Command::Flush(done) => {
                let _ = done.send(());
                Ok(())
            }
        }
    }

    async fn add(&mut self, handle: SourceHandle) -> Result<(), BridgeError> {
        if self.map.channel_of(&handle.path).is_some() {
            debug!(path = %handle.path, "channel re-added; replacing");
            self.remove(&handle.path).await?;
        }
        let descriptor = match ChannelDescriptor::for_source(handle.kind, &handle.path) {
            Ok(d) => d,
            Err(e) => {
                error!(path = %handle.path, kind = %handle.kind, error = %e, "no schema; channel not created");
                return Ok(());
            }
        };
        let topic = descriptor.topic.clone();
        match self.endpoint.add_channel(descriptor).await {
            Ok(id) => {
                info!(path = %handle.path, channel_id = id, topic = %topic, "channel added");
                self.map.insert(handle.path.clone(), id);
                self.handles.insert(handle.path.clone(), handle);
                Ok(())
            }
            Err(BridgeError::EndpointClosed) => Err(BridgeError::EndpointClosed),
            Err(e) => {
                warn!(path = %handle.path, error = %e, "channel not created");
                Ok(())
            }
        }
    }

    async fn remove(&mut self, path: &str) -> Result<(), BridgeError> {
        let Some(id) = self.map.remove_path(path) else {
            debug!(path = %path, "no channel to remove");
            return Ok(());
        };
        if let Some(handle) = self.handles.remove(path) {
            handle.disable();
        }
        info!(path = %path, channel_id = id, "channel removed");
        match self.endpoint.remove_channel(id).await {
            Err(BridgeError::EndpointClosed) => Err(BridgeError::EndpointClosed),
            Err(e) => {
                warn!(path = %path, channel_id = id, error = %e, "endpoint refused channel removal");
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    async fn dispatch(&mut self, payloads: HashMap<String, Vec<u8>>) -> Result<(), BridgeError> {
        for (path, payload) in payloads {
            if payload.is_empty() {
                continue;
            }
            let Some(id) = self.map.channel_of(&path) else {
                debug!(path = %path, "payload dropped: channel not created yet");
                continue;
            };
            let timestamp = self.next_timestamp();
            match self.endpoint.send_message(id, timestamp, &payload).await {
                Err(BridgeError::EndpointClosed) => return Err(BridgeError::EndpointClosed),
                Err(e) => warn!(path = %path, channel_id = id, error = %e, "send failed"),
                Ok(()) => {}
            }
        }
        Ok(())
    }

    fn on_subscription(&mut self, event: SubscriptionEvent) {
        let (id, subscribed) = match event {
            SubscriptionEvent::Subscribed(id) => (id, true),
            SubscriptionEvent::Unsubscribed(id) => (id, false),
        };
        let Some(handle) = self.map.path_of(id).and_then(|p| self.handles.get(p)) else {
            debug!(channel_id = id, subscribed, "subscription change for unknown channel");
            return;
        };
        if subscribed {
            handle.enable();
        } else {
            handle.disable();
        }
        info!(path = %handle.path, channel_id = id, subscribed, "source demand changed");
    }

    /// Nobody can be listening once the worker lets go of a source.
    fn release_handles(&mut self) {
        for (_, handle) in self.handles.drain() {
            handle.disable();
        }
    }

    /// Wall-clock nanoseconds, forced strictly increasing.
    fn next_timestamp(&mut self) -> u64 {
        let now = Utc::now()
            .timestamp_nanos_opt()
            .map_or(0, |ns| u64::try_from(ns).unwrap_or(0));
        let ts = now.max(self.last_timestamp.saturating_add(1));
        self.last_timestamp = ts;
        ts
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.release_handles();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ChannelManager
// ─────────────────────────────────────────────────────────────────────────────

struct Running {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<ChannelMap>,
    endpoint: Arc<dyn PubSubEndpoint>,
    worker: JoinHandle<()>,
}

/// Owner of the endpoint connection and of the path ↔ channel map.
#[derive(Default)]
pub struct ChannelManager {
    running: Mutex<Option<Running>>,
}

impl ChannelManager {
    /// A manager in the closed state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start serving on `port` with the Foxglove WebSocket endpoint and open
    /// one channel per initial source.
    ///
    /// Callers that snapshot `initial` under their own lock should bind with
    /// [`FoxgloveServer::bind`] first and hand the result to
    /// [`open_with`][Self::open_with] under that lock instead.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Endpoint`] if the port cannot be bound.
    pub async fn open(&self, port: u16, initial: Vec<SourceHandle>) -> Result<(), BridgeError> {
        self.close().await;
        let (server, events) = FoxgloveServer::bind(port).await?;
        self.open_with(Arc::new(server), events, initial);
        Ok(())
    }

    /// Open on an existing endpoint and queue one channel per initial
    /// source.  Any previous endpoint is abandoned without a shutdown; use
    /// [`close`][Self::close] first for that.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open_with(
        &self,
        endpoint: Arc<dyn PubSubEndpoint>,
        events: mpsc::UnboundedReceiver<SubscriptionEvent>,
        initial: Vec<SourceHandle>,
    ) {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot) = watch::channel(ChannelMap::default());
        for handle in initial {
            let _ = commands.send(Command::Add(handle));
        }
        let worker = Worker {
            endpoint: Arc::clone(&endpoint),
            map: ChannelMap::default(),
            handles: HashMap::new(),
            last_timestamp: 0,
            snapshot: snapshot_tx,
        };
        let worker = tokio::spawn(worker.run(command_rx, events));

        let previous = self.lock().replace(Running {
            commands,
            snapshot,
            endpoint,
            worker,
        });
        if let Some(previous) = previous {
            previous.worker.abort();
        }
        info!("channel manager open");
    }

    /// Shut the endpoint down and cancel all pending channel work.  Sources
    /// that had a channel are disabled before this returns.
    pub async fn close(&self) {
        let Some(running) = self.lock().take() else {
            return;
        };
        running.worker.abort();
        // The worker drops (and releases its sources) once it has stopped.
        let _ = running.worker.await;
        running.endpoint.shutdown().await;
        info!("channel manager closed");
    }

    /// `true` while open and the endpoint is alive.
    pub fn is_open(&self) -> bool {
        self.lock()
            .as_ref()
            .is_some_and(|r| !r.commands.is_closed())
    }

    /// The map as of the last request the worker finished.
    pub fn snapshot(&self) -> ChannelMap {
        self.lock()
            .as_ref()
            .map(|r| r.snapshot.borrow().clone())
            .unwrap_or_default()
    }

    /// Wait until every request queued so far has been handled.  Returns
    /// `false` if the manager is closed or the worker is gone.
    pub async fn flush(&self) -> bool {
        let (done, wait) = oneshot::channel();
        if !self.send(Command::Flush(done)) {
            return false;
        }
        wait.await.is_ok()
    }

    fn send(&self, command: Command) -> bool {
        match self.lock().as_ref() {
            Some(running) => {
                let sent = running.commands.send(command).is_ok();
                if !sent {
                    debug!("channel worker gone; request dropped");
                }
                sent
            }
            None => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ChannelSink for ChannelManager {
    fn add_channel(&self, source: SourceHandle) {
        self.send(Command::Add(source));
    }

    fn remove_channel(&self, path: &str) {
        self.send(Command::Remove(path.to_string()));
    }

    fn dispatch(&self, payloads: HashMap<String, Vec<u8>>) {
        self.send(Command::Dispatch(payloads));
    }

    fn clear(&self) {
        self.send(Command::Clear);
    }
}

impl Drop for ChannelManager {
    fn drop(&mut self) {
        if let Some(running) = self.lock().take() {
            running.worker.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryEndpoint;
    use foxbridge_types::SourceKind;

    fn open_memory(initial: Vec<SourceHandle>) -> (ChannelManager, Arc<MemoryEndpoint>) {
        let (endpoint, events) = MemoryEndpoint::new();
        let endpoint = Arc::new(endpoint);
        let manager = ChannelManager::new();
        manager.open_with(endpoint.clone(), events, initial);
        (manager, endpoint)
    }

    fn payload(path: &str, bytes: &[u8]) -> HashMap<String, Vec<u8>> {
        HashMap::from([(path.to_string(), bytes.to_vec())])
    }

    #[tokio::test]
    async fn initial_sources_get_channels() -> Result<(), Box<dyn std::error::Error>> {
        let tf = SourceHandle::new("/", SourceKind::TfTree);
        let cam = SourceHandle::new("/World/Cam1", SourceKind::Camera);
        let (manager, endpoint) = open_memory(vec![tf, cam]);
        assert!(manager.flush().await);

        let map = manager.snapshot();
        assert_eq!(map.paths(), vec!["/", "/World/Cam1"]);
        let tf_id = endpoint.channel_on("/tf").ok_or("no /tf channel")?;
        assert_eq!(map.path_of(tf_id), Some("/"));
        assert!(endpoint.channel_on("/World/Cam1").is_some());
        Ok(())
    }

    #[tokio::test]
    async fn subscription_toggles_source() -> Result<(), Box<dyn std::error::Error>> {
        let (manager, endpoint) = open_memory(Vec::new());
        let imu = SourceHandle::new("/World/Imu", SourceKind::Imu);
        manager.add_channel(imu.clone());
        assert!(manager.flush().await);
        let id = manager.snapshot().channel_of("/World/Imu").ok_or("no channel")?;

        endpoint.subscribe(id);
        assert!(manager.flush().await);
        assert!(imu.is_enabled());

        endpoint.unsubscribe(id);
        assert!(manager.flush().await);
        assert!(!imu.is_enabled());
        Ok(())
    }

    #[tokio::test]
    async fn unsubscribe_after_removal_is_benign() -> Result<(), Box<dyn std::error::Error>> {
        let (manager, endpoint) = open_memory(Vec::new());
        let cam = SourceHandle::new("/Cam", SourceKind::Camera);
        manager.add_channel(cam.clone());
        assert!(manager.flush().await);
        let id = manager.snapshot().channel_of("/Cam").ok_or("no channel")?;

        manager.remove_channel("/Cam");
        assert!(manager.flush().await);
        endpoint.unsubscribe(id);
        endpoint.subscribe(id);
        assert!(manager.flush().await);
        assert!(manager.snapshot().is_empty());
        assert!(!cam.is_enabled());
        assert!(manager.is_open());
        Ok(())
    }

    #[tokio::test]
    async fn remove_clears_both_directions() {
        let (manager, endpoint) = open_memory(vec![SourceHandle::new("/Cam", SourceKind::Camera)]);
        assert!(manager.flush().await);
        let id = manager.snapshot().channel_of("/Cam").unwrap();

        manager.remove_channel("/Cam");
        manager.remove_channel("/Cam");
        assert!(manager.flush().await);

        let map = manager.snapshot();
        assert_eq!(map.channel_of("/Cam"), None);
        assert_eq!(map.path_of(id), None);
        assert_eq!(endpoint.removed(), vec![id]);
        assert!(endpoint.channels().is_empty());
    }

    #[tokio::test]
    async fn add_remove_add_same_path_keeps_order() {
        let (manager, endpoint) = open_memory(Vec::new());
        manager.add_channel(SourceHandle::new("/Cam", SourceKind::Camera));
        manager.remove_channel("/Cam");
        manager.add_channel(SourceHandle::new("/Cam", SourceKind::Camera));
        assert!(manager.flush().await);

        assert_eq!(manager.snapshot().len(), 1);
        assert_eq!(endpoint.channels().len(), 1);
        assert_eq!(endpoint.removed().len(), 1);
    }

    #[tokio::test]
    async fn dispatch_sends_known_paths_with_increasing_timestamps() {
        let (manager, endpoint) = open_memory(vec![
            SourceHandle::new("/Cam", SourceKind::Camera),
            SourceHandle::new("/Imu", SourceKind::Imu),
        ]);
        assert!(manager.flush().await);
        let cam = manager.snapshot().channel_of("/Cam").unwrap();

        for i in 0..3u8 {
            manager.dispatch(HashMap::from([
                ("/Cam".to_string(), vec![i + 1]),
                ("/Imu".to_string(), Vec::new()),
                ("/Ghost".to_string(), vec![9]),
            ]));
        }
        assert!(manager.flush().await);

        let sent = endpoint.sent();
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|m| m.channel == cam));
        assert_eq!(sent[2].payload, vec![3]);
        assert!(sent.windows(2).all(|w| w[0].timestamp_ns < w[1].timestamp_ns));
    }

    #[tokio::test]
    async fn dispatch_before_channel_exists_is_dropped() {
        let (manager, endpoint) = open_memory(Vec::new());
        manager.dispatch(payload("/Cam", b"frame"));
        manager.add_channel(SourceHandle::new("/Cam", SourceKind::Camera));
        assert!(manager.flush().await);
        assert!(endpoint.sent().is_empty());
        assert!(manager.is_open());
    }

    #[tokio::test]
    async fn clear_tears_down_every_channel() {
        let (manager, endpoint) = open_memory(vec![
            SourceHandle::new("/", SourceKind::TfTree),
            SourceHandle::new("/Cam", SourceKind::Camera),
        ]);
        manager.clear();
        assert!(manager.flush().await);
        assert!(manager.snapshot().is_empty());
        assert!(endpoint.channels().is_empty());
    }

    #[tokio::test]
    async fn closed_manager_ignores_requests() {
        let (manager, endpoint) = open_memory(Vec::new());
        manager.close().await;
        assert!(!manager.is_open());
        assert!(endpoint.is_closed());

        manager.add_channel(SourceHandle::new("/Cam", SourceKind::Camera));
        manager.dispatch(payload("/Cam", b"x"));
        assert!(!manager.flush().await);
        assert!(manager.snapshot().is_empty());
        manager.close().await;
    }

    #[tokio::test]
    async fn dead_endpoint_closes_manager_cleanly() {
        let cam = SourceHandle::new("/Cam", SourceKind::Camera);
        let (manager, endpoint) = open_memory(vec![cam.clone()]);
        assert!(manager.flush().await);
        assert_eq!(manager.snapshot().len(), 1);
        let id = manager.snapshot().channel_of("/Cam").unwrap();
        endpoint.subscribe(id);
        assert!(manager.flush().await);
        assert!(cam.is_enabled());

        endpoint.close();
        manager.dispatch(payload("/Cam", b"frame"));
        assert!(!manager.flush().await);

        assert!(manager.snapshot().is_empty());
        assert!(!manager.is_open());
        assert!(!cam.is_enabled());
    }

    #[tokio::test]
    async fn close_disables_subscribed_sources() -> Result<(), Box<dyn std::error::Error>> {
        let cam = SourceHandle::new("/Cam", SourceKind::Camera);
        let imu = SourceHandle::new("/Imu", SourceKind::Imu);
        let (manager, endpoint) = open_memory(vec![cam.clone(), imu.clone()]);
        assert!(manager.flush().await);
        for path in ["/Cam", "/Imu"] {
            endpoint.subscribe(manager.snapshot().channel_of(path).ok_or("no channel")?);
        }
        assert!(manager.flush().await);
        assert!(cam.is_enabled() && imu.is_enabled());

        manager.close().await;
        assert!(!cam.is_enabled());
        assert!(!imu.is_enabled());
        Ok(())
    }

    #[tokio::test]
    async fn open_serves_foxglove_on_a_free_port() -> Result<(), Box<dyn std::error::Error>> {
        let manager = ChannelManager::new();
        manager.open(0, vec![SourceHandle::new("/Imu", SourceKind::Imu)]).await?;
        assert!(manager.flush().await);
        assert_eq!(manager.snapshot().paths(), vec!["/Imu"]);
        manager.close().await;
        assert!(!manager.is_open());
        Ok(())
    }

    #[tokio::test]
    async fn reopen_after_close() {
        let (manager, _old) = open_memory(Vec::new());
        manager.close().await;

        let (endpoint, events) = MemoryEndpoint::new();
        let endpoint = Arc::new(endpoint);
        manager.open_with(endpoint.clone(), events, vec![SourceHandle::new("/Imu", SourceKind::Imu)]);
        assert!(manager.flush().await);
        assert!(endpoint.channel_on("/Imu").is_some());
    }
}
