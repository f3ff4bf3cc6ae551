//! [`SourceRegistry`] – catalogue of every data source in the scene.
//!
//! The registry owns one [`Source`] per qualifying scene node, keyed by path,
//! plus a per-kind index of those paths.  [`SourceRegistry::reconcile`]
//! diffs the catalogue against the live scene and reports each add/remove to
//! the [`ChannelSink`]; [`SourceRegistry::collect_tick`] gathers payloads
//! from enabled sources and hands them over for publishing.
//!
//! # Classification
//!
//! | Scene node                                        | Kind           |
//! |---------------------------------------------------|----------------|
//! | type `Camera`                                     | `camera`       |
//! | type `IsaacImuSensor`                             | `imu`          |
//! | carries `PhysicsArticulationRootAPI`              | `articulation` |
//! | set through [`SourceRegistry::set_tf_root`]       | `tf_tree`      |
//!
//! Anything else is not a source and is skipped.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use foxbridge_scene::SimScene;
//! use foxbridge_sources::{RecordingSink, SimProducers, SourceRegistry};
//! use foxbridge_types::SourceKind;
//!
//! let scene = Arc::new(SimScene::new().with_node("/World/Cam1", "Camera"));
//! let sink = Arc::new(RecordingSink::new());
//! let mut registry = SourceRegistry::new(scene, Arc::new(SimProducers::new()), sink.clone());
//!
//! registry.init();
//! assert_eq!(registry.sources_of(SourceKind::Camera), vec!["/World/Cam1"]);
//! assert_eq!(sink.channels(), vec!["/", "/World/Cam1"]);
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use foxbridge_scene::SceneGraph;
use foxbridge_types::{BridgeError, SourceKind};
use tracing::{debug, error, info, instrument, warn};

use crate::adapter::{
    ArticulationAdapter, CameraAdapter, ImuAdapter, Source, SourceAdapter, SourceHandle, TfTreeAdapter,
};
use crate::producer::ProducerFactory;
use crate::sink::ChannelSink;

pub const CAMERA_TYPE: &str = "Camera";
pub const IMU_TYPE: &str = "IsaacImuSensor";
pub const ARTICULATION_ROOT_API: &str = "PhysicsArticulationRootAPI";

pub const DEFAULT_CAMERA_WIDTH: u32 = 128;
pub const DEFAULT_CAMERA_HEIGHT: u32 = 128;

/// Classify a scene node.  `None` means "not a source".
///
/// The transform tree is never produced here; it only exists when forced
/// through [`SourceRegistry::set_tf_root`].
pub fn classify(scene: &dyn SceneGraph, path: &str) -> Option<SourceKind> {
    let type_name = scene.type_name(path)?;
    if type_name == CAMERA_TYPE {
        Some(SourceKind::Camera)
    } else if type_name == IMU_TYPE {
        Some(SourceKind::Imu)
    } else if scene
        .applied_capabilities(path)
        .iter()
        .any(|c| c == ARTICULATION_ROOT_API)
    {
        Some(SourceKind::Articulation)
    } else {
        None
    }
}

fn added_status(kind: SourceKind) -> String {
    format!("\"{kind}\" object added to stage")
}

fn removed_status(kind: SourceKind) -> String {
    format!("\"{kind}\" object removed from stage")
}

/// Catalogue of sources, reconciled against a live [`SceneGraph`].
pub struct SourceRegistry {
    scene: Arc<dyn SceneGraph>,
    producers: Arc<dyn ProducerFactory>,
    sink: Arc<dyn ChannelSink>,
    sources: BTreeMap<String, Source>,
    by_kind: HashMap<SourceKind, BTreeSet<String>>,
    camera_width: u32,
    camera_height: u32,
    tf_root: String,
    last_status: Option<String>,
}

impl SourceRegistry {
    /// Create an empty registry.  Cameras default to 128×128 and the
    /// transform tree to the scene's pseudo-root.
    pub fn new(
        scene: Arc<dyn SceneGraph>,
        producers: Arc<dyn ProducerFactory>,
        sink: Arc<dyn ChannelSink>,
    ) -> Self {
        let tf_root = scene.root_path();
        Self {
            scene,
            producers,
            sink,
            sources: BTreeMap::new(),
            by_kind: SourceKind::ALL.into_iter().map(|k| (k, BTreeSet::new())).collect(),
            camera_width: DEFAULT_CAMERA_WIDTH,
            camera_height: DEFAULT_CAMERA_HEIGHT,
            tf_root,
            last_status: None,
        }
    }

    /// Resolution for cameras discovered later (builder-style).
    pub fn with_camera_resolution(mut self, width: u32, height: u32) -> Self {
        self.camera_width = width;
        self.camera_height = height;
        self
    }

    /// Root used by [`init`][Self::init] (builder-style).
    pub fn with_tf_root(mut self, root: impl Into<String>) -> Self {
        self.tf_root = root.into();
        self
    }

    // ── Lifecycle ───────────────────────────────────────────────────────────

    /// Populate from scratch: the transform tree at the configured root, then
    /// everything [`reconcile`][Self::reconcile] finds.
    pub fn init(&mut self) -> Option<String> {
        let root = self.tf_root.clone();
        self.set_tf_root(&root);
        self.reconcile()
    }

    /// Bring the catalogue in line with the live scene.
    ///
    /// New qualifying nodes are registered (disabled) and announced to the
    /// sink; sources whose node is gone are removed.  The transform-tree
    /// source is always treated as live.
    ///
    /// Returns the status line of the last add or remove performed, or `None`
    /// when nothing changed.
    #[instrument(skip(self), fields(known = self.sources.len()))]
    pub fn reconcile(&mut self) -> Option<String> {
        let nodes = self.scene.traverse();
        let mut status = None;

        let mut live: HashSet<&str> = nodes.iter().map(String::as_str).collect();
        let tf_paths = self.by_kind.get(&SourceKind::TfTree).cloned().unwrap_or_default();
        live.extend(tf_paths.iter().map(String::as_str));

        for path in &nodes {
            if self.sources.contains_key(path) {
                continue;
            }
            let Some(kind) = classify(self.scene.as_ref(), path) else {
                continue;
            };
            match self.build_adapter(path, kind) {
                Ok(adapter) => {
                    self.insert(Source::new(path, adapter));
                    status = Some(added_status(kind));
                }
                Err(e) => warn!(path = %path, %kind, error = %e, "source not created; retrying next reconcile"),
            }
        }

        let gone: Vec<String> = self
            .sources
            .keys()
            .filter(|p| !live.contains(p.as_str()))
            .cloned()
            .collect();
        for path in gone {
            if let Some(kind) = self.remove(&path) {
                status = Some(removed_status(kind));
            }
        }

        if status.is_some() {
            self.last_status.clone_from(&status);
        }
        status
    }

    /// Drop every source and close every channel.  Configuration (camera
    /// resolution, tf root) is kept.
    pub fn reset(&mut self) {
        info!(count = self.sources.len(), "registry reset");
        self.sources.clear();
        for paths in self.by_kind.values_mut() {
            paths.clear();
        }
        self.sink.clear();
        debug_assert!(self.index_is_consistent());
    }

    // ── Configuration ───────────────────────────────────────────────────────

    /// Change the resolution of future cameras and of every registered one.
    /// Cameras whose handle cannot be recreated keep their old resolution.
    pub fn set_camera_resolution(&mut self, width: u32, height: u32) {
        self.camera_width = width;
        self.camera_height = height;
        let cameras = self.sources_of(SourceKind::Camera);
        for path in cameras {
            if let Some(source) = self.sources.get_mut(&path) {
                if let Err(e) = source.update_cam_resolution(self.producers.as_ref(), width, height) {
                    error!(path = %path, error = %e, "camera resolution not applied");
                }
            }
        }
        info!(width, height, "camera resolution set");
    }

    /// Move the transform tree to `root`: the current tree source (if any) is
    /// removed and a new one is registered at `root`, replacing whatever
    /// source already lived at that path.
    pub fn set_tf_root(&mut self, root: &str) {
        for path in self.sources_of(SourceKind::TfTree) {
            self.remove(&path);
        }
        if self.remove(root).is_some() {
            debug!(path = %root, "source displaced by transform tree root");
        }

        let adapter = TfTreeAdapter::new(root, Arc::clone(&self.scene));
        self.insert(Source::new(root, SourceAdapter::TfTree(adapter)));
        self.tf_root = root.to_string();
        self.last_status = Some(added_status(SourceKind::TfTree));
        info!(root = %root, "transform tree root set");
    }

    // ── Collection ──────────────────────────────────────────────────────────

    /// Collect one sample from a single source, enabled or not.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::UnknownNode`] if no source is registered at
    /// `path`, or the source's own collection error.
    pub fn collect(&mut self, path: &str) -> Result<Option<Vec<u8>>, BridgeError> {
        self.sources
            .get_mut(path)
            .ok_or_else(|| BridgeError::UnknownNode(path.to_string()))?
            .collect()
    }

    /// Payloads of every enabled source for this tick.  Sources with nothing
    /// to publish are omitted; a failing source is logged and skipped.
    pub fn collect_payloads(&mut self) -> HashMap<String, Vec<u8>> {
        let mut payloads = HashMap::new();
        for (path, source) in self.sources.iter_mut() {
            if !source.is_enabled() {
                continue;
            }
            match source.collect() {
                Ok(Some(bytes)) => {
                    payloads.insert(path.clone(), bytes);
                }
                Ok(None) => {}
                Err(e) => error!(path = %path, kind = %source.kind(), error = %e, "source collection failed"),
            }
        }
        payloads
    }

    /// Collect from every enabled source and dispatch the result.  Returns
    /// the number of payloads handed to the sink.
    #[instrument(skip(self))]
    pub fn collect_tick(&mut self) -> usize {
        let payloads = self.collect_payloads();
        let count = payloads.len();
        if count > 0 {
            self.sink.dispatch(payloads);
        }
        count
    }

    // ── Queries ─────────────────────────────────────────────────────────────

    /// Paths of every source of `kind`, sorted.
    pub fn sources_of(&self, kind: SourceKind) -> Vec<String> {
        self.by_kind
            .get(&kind)
            .map(|paths| paths.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn source(&self, path: &str) -> Option<&Source> {
        self.sources.get(path)
    }

    /// Handles of every registered source, sorted by path.
    pub fn handles(&self) -> Vec<SourceHandle> {
        self.sources.values().map(Source::handle).collect()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn camera_resolution(&self) -> (u32, u32) {
        (self.camera_width, self.camera_height)
    }

    pub fn tf_root(&self) -> &str {
        &self.tf_root
    }

    /// Status line of the most recent add/remove.
    pub fn last_status(&self) -> Option<&str> {
        self.last_status.as_deref()
    }

    /// `true` when the per-kind index lists exactly the registered paths of
    /// each kind.
    pub fn index_is_consistent(&self) -> bool {
        SourceKind::ALL.into_iter().all(|kind| {
            let indexed = self.by_kind.get(&kind).cloned().unwrap_or_default();
            let actual: BTreeSet<String> = self
                .sources
                .values()
                .filter(|s| s.kind() == kind)
                .map(|s| s.path().to_string())
                .collect();
            indexed == actual
        })
    }

    // ── Internal helpers ────────────────────────────────────────────────────

    fn build_adapter(&self, path: &str, kind: SourceKind) -> Result<SourceAdapter, BridgeError> {
        let producers = self.producers.as_ref();
        Ok(match kind {
            SourceKind::Camera => SourceAdapter::Camera(CameraAdapter::new(
                path,
                producers.camera(path, self.camera_width, self.camera_height)?,
            )),
            SourceKind::Imu => SourceAdapter::Imu(ImuAdapter::new(producers.imu(path)?)),
            SourceKind::Articulation => {
                SourceAdapter::Articulation(ArticulationAdapter::new(path, producers.articulation(path)?))
            }
            SourceKind::TfTree => SourceAdapter::TfTree(TfTreeAdapter::new(path, Arc::clone(&self.scene))),
        })
    }

    fn insert(&mut self, source: Source) {
        let path = source.path().to_string();
        let kind = source.kind();
        let handle = source.handle();
        self.sources.insert(path.clone(), source);
        self.by_kind.entry(kind).or_default().insert(path.clone());
        debug_assert!(self.index_is_consistent());
        info!(path = %path, %kind, "source added");
        self.sink.add_channel(handle);
    }

    fn remove(&mut self, path: &str) -> Option<SourceKind> {
        let source = self.sources.remove(path)?;
        let kind = source.kind();
        if let Some(paths) = self.by_kind.get_mut(&kind) {
            paths.remove(path);
        }
        debug_assert!(self.index_is_consistent());
        info!(path = %path, %kind, "source removed");
        self.sink.remove_channel(path);
        Some(kind)
    }
}
