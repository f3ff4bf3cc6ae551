//! Producer traits – the simulator-side handles a source reads from.
//!
//! A [`ProducerFactory`] creates one producer per discovered scene node.  The
//! registry never talks to sensors directly; everything goes through these
//! traits so the bridge runs unchanged against the real simulator or against
//! [`SimProducers`][crate::sim::SimProducers].

use foxbridge_types::{BridgeError, CameraFrame, ImuReading};

/// A render product attached to a camera node.
pub trait CameraProducer: Send {
    /// Resolution this handle was created with, as `(width, height)`.
    fn resolution(&self) -> (u32, u32);

    /// Capture the most recent rendered frame.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::HardwareFault`] if no frame is available.
    fn capture(&mut self) -> Result<CameraFrame, BridgeError>;
}

/// Query interface for one IMU node.
pub trait ImuProducer: Send {
    /// The latest reading.  A reading may come back with `is_valid == false`
    /// while the sensor warms up.
    fn reading(&mut self) -> Result<ImuReading, BridgeError>;
}

/// Joint-state interface of one articulation root.
///
/// All four queries return index-aligned sequences, one entry per degree of
/// freedom.
pub trait ArticulationProducer: Send {
    fn dof_names(&mut self) -> Result<Vec<String>, BridgeError>;
    fn joint_positions(&mut self) -> Result<Vec<f64>, BridgeError>;
    fn joint_velocities(&mut self) -> Result<Vec<f64>, BridgeError>;
    fn measured_efforts(&mut self) -> Result<Vec<f64>, BridgeError>;
}

/// Creates producer handles for scene nodes.
pub trait ProducerFactory: Send + Sync {
    /// Create a capture handle for the camera at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::HardwareFault`] if the render product cannot be
    /// created.
    fn camera(&self, path: &str, width: u32, height: u32) -> Result<Box<dyn CameraProducer>, BridgeError>;

    fn imu(&self, path: &str) -> Result<Box<dyn ImuProducer>, BridgeError>;

    fn articulation(&self, path: &str) -> Result<Box<dyn ArticulationProducer>, BridgeError>;
}
