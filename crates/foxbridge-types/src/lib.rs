//! `foxbridge-types` – shared vocabulary for the scene-to-Foxglove bridge.
//!
//! Every other crate in the workspace speaks in these types: the closed set of
//! [`SourceKind`]s, the raw readings producers hand back, the geometry used by
//! the transform tree, and the workspace-wide [`BridgeError`].

pub mod geometry;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use geometry::{Matrix4, Quaternion, Transform3D, Vec3};

/// The four kinds of data source the bridge knows how to publish.
///
/// The set is closed: adding a kind means adding a variant here, and the
/// compiler then points at every `match` that has to learn about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// A rendered camera; publishes compressed JPEG frames.
    Camera,
    /// An inertial measurement unit.
    Imu,
    /// An articulation root; publishes joint states.
    Articulation,
    /// The flattened transform tree below a chosen root.
    TfTree,
}

impl SourceKind {
    /// Every kind, in a stable order.
    pub const ALL: [SourceKind; 4] = [
        SourceKind::Camera,
        SourceKind::Imu,
        SourceKind::Articulation,
        SourceKind::TfTree,
    ];

    /// Stable lowercase tag, e.g. `"tf_tree"`.
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Camera => "camera",
            SourceKind::Imu => "imu",
            SourceKind::Articulation => "articulation",
            SourceKind::TfTree => "tf_tree",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SourceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| BridgeError::UnknownSourceKind(s.to_string()))
    }
}

/// Pixel layout of a [`CameraFrame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb8,
    Rgba8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb8 => 3,
            PixelFormat::Rgba8 => 4,
        }
    }
}

/// A raw image frame returned by a camera producer.
#[derive(Debug, Clone)]
pub struct CameraFrame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    pub format: PixelFormat,
    /// Row-major pixel data, `width * height * bytes_per_pixel` bytes.
    pub data: Vec<u8>,
}

/// One instantaneous IMU sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuReading {
    /// `false` when the simulator had no valid sample for this step.
    pub is_valid: bool,
    /// Angular velocity in rad/s.
    pub angular_velocity: Vec3,
    /// Linear acceleration in m/s².
    pub linear_acceleration: Vec3,
    pub orientation: Quaternion,
    /// Simulation time of the sample, in seconds.
    pub time: f64,
}

/// Workspace-wide error type.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    #[error("Producer Fault on {component}: {details}")]
    HardwareFault { component: String, details: String },

    #[error("Invalid Reading from {0}")]
    InvalidReading(String),

    #[error("Image Encoding Error: {0}")]
    ImageEncoding(String),

    #[error("Serialization Error: {0}")]
    Serialization(String),

    #[error("Endpoint Error: {0}")]
    Endpoint(String),

    #[error("Endpoint Closed")]
    EndpointClosed,

    #[error("Not a camera: {0}")]
    NotACamera(String),

    #[error("Unknown scene node: {0}")]
    UnknownNode(String),

    #[error("Unknown source kind: {0:?}")]
    UnknownSourceKind(String),

    #[error("Configuration Error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_kind_tags_roundtrip_through_from_str() {
        for kind in SourceKind::ALL {
            assert_eq!(kind.as_str().parse::<SourceKind>().unwrap(), kind);
        }
    }

    #[test]
    fn unknown_source_kind_fails_fast() {
        let err = "camera_raw".parse::<SourceKind>().unwrap_err();
        assert_eq!(err, BridgeError::UnknownSourceKind("camera_raw".to_string()));
    }

    #[test]
    fn source_kind_serializes_as_snake_case() {
        let json = serde_json::to_string(&SourceKind::TfTree).unwrap();
        assert_eq!(json, "\"tf_tree\"");
    }

    #[test]
    fn bridge_error_display() {
        let err = BridgeError::HardwareFault {
            component: "/World/Robot".to_string(),
            details: "articulation view invalid".to_string(),
        };
        assert!(err.to_string().contains("/World/Robot"));
        assert!(BridgeError::EndpointClosed.to_string().contains("Closed"));
    }

    #[test]
    fn pixel_format_sizes() {
        assert_eq!(PixelFormat::Rgb8.bytes_per_pixel(), 3);
        assert_eq!(PixelFormat::Rgba8.bytes_per_pixel(), 4);
    }
}
