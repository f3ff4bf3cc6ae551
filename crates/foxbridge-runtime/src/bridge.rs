//! [`Bridge`] – the operator-facing facade.
//!
//! Owns a [`SourceRegistry`] wired to a [`ChannelManager`] and exposes the
//! handful of controls an operator (panel, REPL, or host application) needs:
//! publishing on/off, port, camera resolution, transform-tree root, and the
//! two simulator hooks.
//!
//! | Hook | When the host calls it | Effect |
//! |---|---|---|
//! | [`on_stage_changed`][Bridge::on_stage_changed] | nodes were added to or removed from the scene | reconcile the registry |
//! | [`on_physics_step`][Bridge::on_physics_step] | every simulation tick | collect and dispatch, if publishing |
//!
//! Every control leaves a one-line status, readable through
//! [`last_status`][Bridge::last_status]; the latest action wins.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use foxbridge_runtime::{Bridge, BridgeSettings};
//! use foxbridge_scene::SimScene;
//! use foxbridge_sources::SimProducers;
//!
//! # #[tokio::main] async fn main() -> Result<(), foxbridge_types::BridgeError> {
//! let scene = Arc::new(SimScene::new().with_node("/World/Cam1", "Camera"));
//! let bridge = Bridge::new(scene, Arc::new(SimProducers::new()), BridgeSettings::default());
//! bridge.start().await?;
//! bridge.on_physics_step();
//! # Ok(()) }
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use foxbridge_middleware::{
    ChannelManager, ChannelMap, DEFAULT_PORT, FoxgloveServer, PubSubEndpoint, SubscriptionEvent,
};
use foxbridge_scene::{SceneGraph, tf_root_candidates};
use foxbridge_sources::{ProducerFactory, SourceRegistry};
use foxbridge_types::{BridgeError, SourceKind};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

// ─────────────────────────────────────────────────────────────────────────────
// Settings
// ─────────────────────────────────────────────────────────────────────────────

/// Runtime configuration of a [`Bridge`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeSettings {
    pub port: u16,
    pub camera_width: u32,
    pub camera_height: u32,
    /// Transform-tree root; `None` means the scene's pseudo-root.
    pub tf_root: Option<String>,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            camera_width: 128,
            camera_height: 128,
            tf_root: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Bridge
// ─────────────────────────────────────────────────────────────────────────────

struct State {
    registry: SourceRegistry,
    port: u16,
    publishing: bool,
    status: Option<String>,
}

impl State {
    fn set_status(&mut self, status: impl Into<String>) {
        let status = status.into();
        info!(status = %status, "bridge status");
        self.status = Some(status);
    }
}

/// Scene → Foxglove bridge.
pub struct Bridge {
    scene: Arc<dyn SceneGraph>,
    channels: Arc<ChannelManager>,
    state: Mutex<State>,
}

impl Bridge {
    /// Build the registry from `settings` and populate it from `scene`.
    /// Publishing starts off.
    pub fn new(scene: Arc<dyn SceneGraph>, producers: Arc<dyn ProducerFactory>, settings: BridgeSettings) -> Self {
        let channels = Arc::new(ChannelManager::new());
        let mut registry = SourceRegistry::new(Arc::clone(&scene), producers, channels.clone())
            .with_camera_resolution(settings.camera_width, settings.camera_height);
        if let Some(root) = settings.tf_root {
            registry = registry.with_tf_root(root);
        }
        let status = registry.init();

        Self {
            scene,
            channels,
            state: Mutex::new(State {
                registry,
                port: settings.port,
                publishing: false,
                status,
            }),
        }
    }

    // ── Publishing ──────────────────────────────────────────────────────────

    /// Serve on the configured port and advertise every current source.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Endpoint`] if the port cannot be bound.
    pub async fn start(&self) -> Result<(), BridgeError> {
        self.channels.close().await;
        let port = self.lock().port;
        let (server, events) = match FoxgloveServer::bind(port).await {
            Ok(bound) => bound,
            Err(e) => {
                let mut state = self.lock();
                state.publishing = false;
                state.set_status(format!("Foxglove server failed to start: {e}"));
                return Err(e);
            }
        };
        let mut state = self.lock();
        self.open_locked(&mut state, Arc::new(server), events);
        state.set_status(format!("Foxglove server started at: ws://0.0.0.0:{port}"));
        Ok(())
    }

    /// Start publishing on an already-constructed endpoint.
    pub async fn start_on(
        &self,
        endpoint: Arc<dyn PubSubEndpoint>,
        events: mpsc::UnboundedReceiver<SubscriptionEvent>,
    ) {
        self.channels.close().await;
        let mut state = self.lock();
        self.open_locked(&mut state, endpoint, events);
        state.set_status("Foxglove server started");
    }

    /// Open the manager on the registry's current sources.  Holding the state
    /// lock keeps reconciles out until the manager accepts requests, so every
    /// source is either in the initial set or queued after it.
    fn open_locked(
        &self,
        state: &mut State,
        endpoint: Arc<dyn PubSubEndpoint>,
        events: mpsc::UnboundedReceiver<SubscriptionEvent>,
    ) {
        let handles = state.registry.handles();
        self.channels.open_with(endpoint, events, handles);
        state.publishing = true;
    }

    /// Stop serving.  Sources stay registered but are disabled until a client
    /// subscribes again.
    pub async fn stop(&self) {
        self.channels.close().await;
        let mut state = self.lock();
        state.publishing = false;
        state.set_status("Foxglove server closed");
    }

    /// Change the port, restarting the server if it is running.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Endpoint`] if the restart cannot bind.
    pub async fn apply_port(&self, port: u16) -> Result<(), BridgeError> {
        let publishing = {
            let mut state = self.lock();
            state.port = port;
            state.publishing
        };
        if publishing {
            self.stop().await;
            self.start().await?;
        }
        self.lock().set_status(format!("Server port was set to {port}"));
        Ok(())
    }

    // ── Configuration ───────────────────────────────────────────────────────

    /// Resize every camera, current and future.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Config`] for a zero dimension.
    pub fn set_camera_resolution(&self, width: u32, height: u32) -> Result<(), BridgeError> {
        if width == 0 || height == 0 {
            return Err(BridgeError::Config(format!("camera resolution {width}x{height}")));
        }
        let mut state = self.lock();
        state.registry.set_camera_resolution(width, height);
        state.set_status(format!("Camera resolution set to {width}x{height}"));
        Ok(())
    }

    /// Move the transform tree to `root`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::UnknownNode`] if `root` is not in the scene.
    pub fn set_tf_root(&self, root: &str) -> Result<(), BridgeError> {
        if !self.scene.contains(root) {
            warn!(root = %root, "transform tree root not in scene");
            return Err(BridgeError::UnknownNode(root.to_string()));
        }
        let mut state = self.lock();
        state.registry.set_tf_root(root);
        state.set_status(format!("Transform Tree root was set to {root}"));
        Ok(())
    }

    // ── Simulator hooks ─────────────────────────────────────────────────────

    /// One simulation tick.  Returns the number of payloads dispatched (zero
    /// when not publishing).
    pub fn on_physics_step(&self) -> usize {
        let mut state = self.lock();
        if !state.publishing {
            return 0;
        }
        state.registry.collect_tick()
    }

    /// The scene gained or lost nodes.  Returns the reconcile status, if
    /// anything changed.
    pub fn on_stage_changed(&self) -> Option<String> {
        let mut state = self.lock();
        let status = state.registry.reconcile();
        if let Some(status) = &status {
            state.set_status(status.clone());
        }
        status
    }

    /// Drop every source and channel, then repopulate from the scene.
    pub fn reload(&self) -> Option<String> {
        let mut state = self.lock();
        state.registry.reset();
        let status = state.registry.init();
        state.set_status("Sources reloaded");
        status
    }

    // ── Queries ─────────────────────────────────────────────────────────────

    pub fn sources_of(&self, kind: SourceKind) -> Vec<String> {
        self.lock().registry.sources_of(kind)
    }

    /// Nodes offered as transform-tree roots.
    pub fn tf_root_candidates(&self) -> Vec<String> {
        tf_root_candidates(self.scene.as_ref())
    }

    pub fn tf_root(&self) -> String {
        self.lock().registry.tf_root().to_string()
    }

    pub fn camera_resolution(&self) -> (u32, u32) {
        self.lock().registry.camera_resolution()
    }

    pub fn port(&self) -> u16 {
        self.lock().port
    }

    pub fn last_status(&self) -> Option<String> {
        self.lock().status.clone()
    }

    pub fn is_publishing(&self) -> bool {
        self.lock().publishing
    }

    /// Path ↔ channel map as last published by the channel worker.
    pub fn channels(&self) -> ChannelMap {
        self.channels.snapshot()
    }

    /// Paths of enabled sources, i.e. those with at least one subscriber.
    pub fn enabled_sources(&self) -> Vec<String> {
        self.lock()
            .registry
            .handles()
            .into_iter()
            .filter(|h| h.is_enabled())
            .map(|h| h.path)
            .collect()
    }

    /// Wait for queued channel work to finish.  `false` when not publishing.
    pub async fn flush(&self) -> bool {
        self.channels.flush().await
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use foxbridge_middleware::MemoryEndpoint;
    use foxbridge_scene::SimScene;
    use foxbridge_sources::SimProducers;

    fn scene() -> Arc<SimScene> {
        Arc::new(
            SimScene::new()
                .with_node("/World", "Xform")
                .with_node("/World/Cam1", "Camera")
                .with_node("/World/Imu", "IsaacImuSensor"),
        )
    }

    async fn publishing_bridge(scene: Arc<SimScene>) -> (Bridge, Arc<MemoryEndpoint>) {
        let bridge = Bridge::new(scene, Arc::new(SimProducers::new()), BridgeSettings::default());
        let (endpoint, events) = MemoryEndpoint::new();
        let endpoint = Arc::new(endpoint);
        bridge.start_on(endpoint.clone(), events).await;
        assert!(bridge.flush().await);
        (bridge, endpoint)
    }

    #[test]
    fn new_bridge_is_populated_but_not_publishing() {
        let bridge = Bridge::new(scene(), Arc::new(SimProducers::new()), BridgeSettings::default());
        assert!(!bridge.is_publishing());
        assert_eq!(bridge.sources_of(SourceKind::Camera), vec!["/World/Cam1"]);
        assert_eq!(bridge.sources_of(SourceKind::Imu), vec!["/World/Imu"]);
        assert_eq!(bridge.sources_of(SourceKind::TfTree), vec!["/"]);
        assert_eq!(bridge.on_physics_step(), 0);
    }

    #[test]
    fn settings_are_applied_on_construction() {
        let settings = BridgeSettings {
            camera_width: 64,
            camera_height: 48,
            tf_root: Some("/World".to_string()),
            ..BridgeSettings::default()
        };
        let bridge = Bridge::new(scene(), Arc::new(SimProducers::new()), settings);
        assert_eq!(bridge.camera_resolution(), (64, 48));
        assert_eq!(bridge.tf_root(), "/World");
        assert_eq!(bridge.sources_of(SourceKind::TfTree), vec!["/World"]);
    }

    #[tokio::test]
    async fn start_advertises_every_source() {
        let (bridge, endpoint) = publishing_bridge(scene()).await;
        assert!(bridge.is_publishing());
        assert!(endpoint.channel_on("/World/Cam1").is_some());
        assert!(endpoint.channel_on("/World/Imu").is_some());
        assert!(endpoint.channel_on("/tf").is_some());
        assert_eq!(bridge.channels().len(), 3);
    }

    #[tokio::test]
    async fn subscribed_camera_publishes_each_tick() {
        let (bridge, endpoint) = publishing_bridge(scene()).await;
        assert_eq!(bridge.on_physics_step(), 0);

        let cam = endpoint.channel_on("/World/Cam1").unwrap();
        endpoint.subscribe(cam);
        assert!(bridge.flush().await);
        assert_eq!(bridge.enabled_sources(), vec!["/World/Cam1"]);

        assert_eq!(bridge.on_physics_step(), 1);
        assert!(bridge.flush().await);
        let sent = endpoint.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].channel, cam);
        assert!(!sent[0].payload.is_empty());
    }

    #[tokio::test]
    async fn stage_changes_reach_the_endpoint() {
        let scene = scene();
        let (bridge, endpoint) = publishing_bridge(scene.clone()).await;

        scene.insert("/World/Cam2", "Camera").unwrap();
        assert_eq!(
            bridge.on_stage_changed().as_deref(),
            Some("\"camera\" object added to stage")
        );
        assert!(bridge.flush().await);
        assert!(endpoint.channel_on("/World/Cam2").is_some());

        scene.remove("/World/Imu");
        bridge.on_stage_changed();
        assert!(bridge.flush().await);
        assert!(endpoint.channel_on("/World/Imu").is_none());
        assert_eq!(bridge.last_status().as_deref(), Some("\"imu\" object removed from stage"));
        assert_eq!(bridge.on_stage_changed(), None);
    }

    #[tokio::test]
    async fn stop_keeps_sources_and_disables_them() {
        let (bridge, endpoint) = publishing_bridge(scene()).await;
        let cam = endpoint.channel_on("/World/Cam1").unwrap();
        endpoint.subscribe(cam);
        assert!(bridge.flush().await);

        bridge.stop().await;
        assert!(!bridge.is_publishing());
        assert!(endpoint.is_closed());
        assert!(bridge.enabled_sources().is_empty());
        assert_eq!(bridge.sources_of(SourceKind::Camera), vec!["/World/Cam1"]);
        assert_eq!(bridge.on_physics_step(), 0);
        assert_eq!(bridge.last_status().as_deref(), Some("Foxglove server closed"));
        assert!(!bridge.flush().await);
    }

    #[tokio::test]
    async fn port_change_while_stopped_only_records_it() -> Result<(), BridgeError> {
        let bridge = Bridge::new(scene(), Arc::new(SimProducers::new()), BridgeSettings::default());
        bridge.apply_port(9000).await?;
        assert_eq!(bridge.port(), 9000);
        assert!(!bridge.is_publishing());
        assert_eq!(bridge.last_status().as_deref(), Some("Server port was set to 9000"));
        Ok(())
    }

    #[tokio::test]
    async fn start_serves_foxglove_on_a_free_port() -> Result<(), BridgeError> {
        let settings = BridgeSettings {
            port: 0,
            ..BridgeSettings::default()
        };
        let bridge = Bridge::new(scene(), Arc::new(SimProducers::new()), settings);
        bridge.start().await?;
        assert!(bridge.is_publishing());
        assert!(bridge.flush().await);
        assert_eq!(bridge.channels().len(), 3);
        bridge.stop().await;
        Ok(())
    }

    #[tokio::test]
    async fn restart_leaves_no_stale_demand() {
        let (bridge, endpoint) = publishing_bridge(scene()).await;
        endpoint.subscribe(endpoint.channel_on("/World/Cam1").unwrap());
        assert!(bridge.flush().await);
        assert_eq!(bridge.enabled_sources(), vec!["/World/Cam1"]);

        let (next, events) = MemoryEndpoint::new();
        let next = Arc::new(next);
        bridge.start_on(next.clone(), events).await;
        assert!(bridge.flush().await);
        assert!(endpoint.is_closed());
        assert!(bridge.enabled_sources().is_empty());
        assert_eq!(bridge.on_physics_step(), 0);
        assert!(next.channel_on("/World/Cam1").is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn sources_added_during_start_get_channels() -> Result<(), Box<dyn std::error::Error>> {
        for round in 0..25 {
            let scene = scene();
            let settings = BridgeSettings {
                port: 0,
                ..BridgeSettings::default()
            };
            let bridge = Arc::new(Bridge::new(scene.clone(), Arc::new(SimProducers::new()), settings));

            let stage = {
                let bridge = Arc::clone(&bridge);
                std::thread::spawn(move || {
                    for i in 0..4 {
                        scene.insert(&format!("/World/Cam{round}_{i}"), "Camera").unwrap();
                        bridge.on_stage_changed();
                    }
                })
            };
            bridge.start().await?;
            stage.join().map_err(|_| "stage thread panicked")?;
            assert!(bridge.flush().await);

            let sources: usize = SourceKind::ALL.iter().map(|&k| bridge.sources_of(k).len()).sum();
            assert_eq!(sources, 7);
            assert_eq!(bridge.channels().len(), sources);
            bridge.stop().await;
        }
        Ok(())
    }

    #[test]
    fn resolution_and_root_controls() {
        let bridge = Bridge::new(scene(), Arc::new(SimProducers::new()), BridgeSettings::default());

        assert!(matches!(bridge.set_camera_resolution(0, 10), Err(BridgeError::Config(_))));
        bridge.set_camera_resolution(320, 240).unwrap();
        assert_eq!(bridge.camera_resolution(), (320, 240));
        assert_eq!(bridge.last_status().as_deref(), Some("Camera resolution set to 320x240"));

        assert_eq!(
            bridge.set_tf_root("/Nowhere"),
            Err(BridgeError::UnknownNode("/Nowhere".to_string()))
        );
        bridge.set_tf_root("/World").unwrap();
        assert_eq!(bridge.sources_of(SourceKind::TfTree), vec!["/World"]);
        assert_eq!(bridge.last_status().as_deref(), Some("Transform Tree root was set to /World"));
    }

    #[test]
    fn tf_root_candidates_start_at_the_pseudo_root() {
        let bridge = Bridge::new(scene(), Arc::new(SimProducers::new()), BridgeSettings::default());
        let candidates = bridge.tf_root_candidates();
        assert_eq!(candidates.first().map(String::as_str), Some("/"));
        assert!(candidates.contains(&"/World".to_string()));
    }

    #[test]
    fn reload_repopulates_from_the_scene() {
        let bridge = Bridge::new(scene(), Arc::new(SimProducers::new()), BridgeSettings::default());
        bridge.reload();
        assert_eq!(bridge.sources_of(SourceKind::Camera), vec!["/World/Cam1"]);
        assert_eq!(bridge.last_status().as_deref(), Some("Sources reloaded"));
    }
}
