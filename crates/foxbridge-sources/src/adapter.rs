//! Source Adapters – one per registered scene node.
//!
//! A [`Source`] pairs a path with a [`SourceAdapter`] and a shared enabled
//! flag.  The adapter variant decides how one reading is turned into payload
//! bytes:
//!
//! | Variant        | Payload                                   |
//! |----------------|-------------------------------------------|
//! | `Camera`       | protobuf `foxglove.CompressedImage` (JPEG) |
//! | `Imu`          | JSON [`ImuMessage`]                        |
//! | `Articulation` | JSON [`JointStatesMessage`]                |
//! | `TfTree`       | protobuf `foxglove.FrameTransforms`        |
//!
//! `collect()` returning `Ok(None)` means "nothing to publish this tick".

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use foxbridge_scene::{ExclusionFilter, SceneGraph, TransformEntry, flatten};
use foxbridge_schema::proto::foxglove::{
    CompressedImage, FrameTransform, FrameTransforms, Quaternion, Timestamp, Vector3,
};
use foxbridge_schema::{ImuMessage, JointStatesMessage};
use foxbridge_types::{BridgeError, CameraFrame, PixelFormat, SourceKind};
use image::ExtendedColorType;
use image::codecs::jpeg::JpegEncoder;
use prost::Message;
use tracing::{debug, warn};

use crate::producer::{ArticulationProducer, CameraProducer, ImuProducer, ProducerFactory};

const JPEG_QUALITY: u8 = 75;

// ─────────────────────────────────────────────────────────────────────────────
// SourceHandle
// ─────────────────────────────────────────────────────────────────────────────

/// The part of a [`Source`] the channel side may hold on to: identity plus
/// the enabled flag.  Toggling the flag through a handle is seen by the
/// registry on its next tick.
#[derive(Debug, Clone)]
pub struct SourceHandle {
    pub path: String,
    pub kind: SourceKind,
    enabled: Arc<AtomicBool>,
}

impl SourceHandle {
    pub fn new(path: impl Into<String>, kind: SourceKind) -> Self {
        Self {
            path: path.into(),
            kind,
            enabled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Per-kind adapters
// ─────────────────────────────────────────────────────────────────────────────

pub struct CameraAdapter {
    path: String,
    producer: Box<dyn CameraProducer>,
}

impl CameraAdapter {
    pub fn new(path: &str, producer: Box<dyn CameraProducer>) -> Self {
        Self {
            path: path.to_string(),
            producer,
        }
    }

    pub fn resolution(&self) -> (u32, u32) {
        self.producer.resolution()
    }

    /// Capture and compress one frame.  Capture and encoding faults are
    /// logged and skipped.
    fn collect(&mut self) -> Option<Vec<u8>> {
        match self.compressed_frame() {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(path = %self.path, error = %e, "camera frame skipped");
                None
            }
        }
    }

    fn compressed_frame(&mut self) -> Result<Vec<u8>, BridgeError> {
        let frame = self.producer.capture()?;
        let msg = CompressedImage {
            timestamp: Some(now()),
            data: encode_jpeg(&frame)?,
            format: "jpeg".to_string(),
            frame_id: self.path.clone(),
        };
        Ok(msg.encode_to_vec())
    }
}

/// JPEG-encode a raw frame.  Alpha is dropped; JPEG has no alpha channel.
pub fn encode_jpeg(frame: &CameraFrame) -> Result<Vec<u8>, BridgeError> {
    let expected = frame.width as usize * frame.height as usize * frame.format.bytes_per_pixel();
    if frame.width == 0 || frame.height == 0 || frame.data.len() != expected {
        return Err(BridgeError::ImageEncoding(format!(
            "{}x{} {:?} frame needs {expected} bytes, got {}",
            frame.width,
            frame.height,
            frame.format,
            frame.data.len()
        )));
    }

    let rgb: Vec<u8> = match frame.format {
        PixelFormat::Rgb8 => frame.data.clone(),
        PixelFormat::Rgba8 => frame
            .data
            .chunks_exact(4)
            .flat_map(|px| [px[0], px[1], px[2]])
            .collect(),
    };

    let mut out = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY)
        .encode(&rgb, frame.width, frame.height, ExtendedColorType::Rgb8)
        .map_err(|e| BridgeError::ImageEncoding(e.to_string()))?;
    Ok(out.into_inner())
}

pub struct ImuAdapter {
    producer: Box<dyn ImuProducer>,
    swallowed: u64,
}

impl ImuAdapter {
    pub fn new(producer: Box<dyn ImuProducer>) -> Self {
        Self {
            producer,
            swallowed: 0,
        }
    }

    /// Readings dropped so far because the query failed or came back invalid.
    pub fn swallowed_readings(&self) -> u64 {
        self.swallowed
    }

    fn collect(&mut self) -> Result<Option<Vec<u8>>, BridgeError> {
        // Failed and invalid readings are dropped without logging; the counter
        // is the only trace they leave.
        let reading = match self.producer.reading() {
            Ok(r) if r.is_valid => r,
            _ => {
                self.swallowed += 1;
                return Ok(None);
            }
        };
        serde_json::to_vec(&ImuMessage::from(&reading))
            .map(Some)
            .map_err(|e| BridgeError::Serialization(format!("imu: {e}")))
    }
}

pub struct ArticulationAdapter {
    path: String,
    producer: Box<dyn ArticulationProducer>,
}

impl ArticulationAdapter {
    pub fn new(path: &str, producer: Box<dyn ArticulationProducer>) -> Self {
        Self {
            path: path.to_string(),
            producer,
        }
    }

    fn collect(&mut self) -> Result<Option<Vec<u8>>, BridgeError> {
        let msg = JointStatesMessage {
            joint_names: self.producer.dof_names()?,
            joint_positions: self.producer.joint_positions()?,
            joint_velocities: self.producer.joint_velocities()?,
            joint_efforts: self.producer.measured_efforts()?,
        };
        let dofs = msg.joint_names.len();
        if msg.joint_positions.len() != dofs
            || msg.joint_velocities.len() != dofs
            || msg.joint_efforts.len() != dofs
        {
            return Err(BridgeError::InvalidReading(format!(
                "{}: joint sequences disagree on dof count {dofs}",
                self.path
            )));
        }
        serde_json::to_vec(&msg)
            .map(Some)
            .map_err(|e| BridgeError::Serialization(format!("joint states: {e}")))
    }
}

pub struct TfTreeAdapter {
    root: String,
    scene: Arc<dyn SceneGraph>,
    filter: ExclusionFilter,
}

impl TfTreeAdapter {
    pub fn new(root: &str, scene: Arc<dyn SceneGraph>) -> Self {
        Self {
            root: root.to_string(),
            scene,
            filter: ExclusionFilter::standard(),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    fn collect(&self) -> Vec<u8> {
        let stamp = now();
        let transforms = flatten(self.scene.as_ref(), &self.root, &self.filter)
            .into_iter()
            .map(|entry| frame_transform(entry, stamp))
            .collect();
        FrameTransforms { transforms }.encode_to_vec()
    }
}

fn frame_transform(entry: TransformEntry, stamp: Timestamp) -> FrameTransform {
    let t = entry.transform.extract_translation();
    let r = entry.transform.extract_rotation();
    FrameTransform {
        timestamp: Some(stamp),
        parent_frame_id: entry.parent_id,
        child_frame_id: entry.child_id,
        translation: Some(Vector3 { x: t.x, y: t.y, z: t.z }),
        rotation: Some(Quaternion {
            x: r.x,
            y: r.y,
            z: r.z,
            w: r.w,
        }),
    }
}

fn now() -> Timestamp {
    let now = Utc::now();
    Timestamp {
        seconds: now.timestamp(),
        nanos: now.timestamp_subsec_nanos() as i32,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Source
// ─────────────────────────────────────────────────────────────────────────────

/// Kind-specific behaviour of a [`Source`].
pub enum SourceAdapter {
    Camera(CameraAdapter),
    Imu(ImuAdapter),
    Articulation(ArticulationAdapter),
    TfTree(TfTreeAdapter),
}

impl SourceAdapter {
    pub fn kind(&self) -> SourceKind {
        match self {
            SourceAdapter::Camera(_) => SourceKind::Camera,
            SourceAdapter::Imu(_) => SourceKind::Imu,
            SourceAdapter::Articulation(_) => SourceKind::Articulation,
            SourceAdapter::TfTree(_) => SourceKind::TfTree,
        }
    }
}

/// A registered data source.  Starts disabled.
pub struct Source {
    handle: SourceHandle,
    adapter: SourceAdapter,
}

impl Source {
    pub fn new(path: &str, adapter: SourceAdapter) -> Self {
        Self {
            handle: SourceHandle::new(path, adapter.kind()),
            adapter,
        }
    }

    pub fn path(&self) -> &str {
        &self.handle.path
    }

    /// Fixed at construction.
    pub fn kind(&self) -> SourceKind {
        self.handle.kind
    }

    pub fn handle(&self) -> SourceHandle {
        self.handle.clone()
    }

    pub fn adapter(&self) -> &SourceAdapter {
        &self.adapter
    }

    pub fn enable(&self) {
        self.handle.enable();
    }

    pub fn disable(&self) {
        self.handle.disable();
    }

    pub fn is_enabled(&self) -> bool {
        self.handle.is_enabled()
    }

    /// Read and serialize one sample, regardless of the enabled flag.
    ///
    /// # Errors
    ///
    /// Articulation producer faults and serialization failures propagate.
    /// Camera and IMU faults are absorbed and yield `Ok(None)`.
    pub fn collect(&mut self) -> Result<Option<Vec<u8>>, BridgeError> {
        match &mut self.adapter {
            SourceAdapter::Camera(cam) => Ok(cam.collect()),
            SourceAdapter::Imu(imu) => imu.collect(),
            SourceAdapter::Articulation(art) => art.collect(),
            SourceAdapter::TfTree(tf) => Ok(Some(tf.collect())),
        }
    }

    /// Replace a camera's capture handle with one at the new resolution.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::NotACamera`] for any other kind, or the
    /// factory's error if the new handle cannot be created (the old handle is
    /// kept in that case).
    pub fn update_cam_resolution(
        &mut self,
        factory: &dyn ProducerFactory,
        width: u32,
        height: u32,
    ) -> Result<(), BridgeError> {
        let SourceAdapter::Camera(cam) = &mut self.adapter else {
            let err = BridgeError::NotACamera(self.handle.path.clone());
            warn!(path = %self.handle.path, kind = %self.handle.kind, "resolution change ignored: not a camera");
            return Err(err);
        };
        cam.producer = factory.camera(&cam.path, width, height)?;
        debug!(path = %cam.path, width, height, "camera handle recreated");
        Ok(())
    }

    /// IMU readings dropped so far; `0` for other kinds.
    pub fn swallowed_readings(&self) -> u64 {
        match &self.adapter {
            SourceAdapter::Imu(imu) => imu.swallowed_readings(),
            _ => 0,
        }
    }
}
