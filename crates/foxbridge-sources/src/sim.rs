//! [`SimProducers`] – stub producers for tests and headless runs.
//!
//! | Producer     | Stub behaviour |
//! |---|---|
//! | Camera       | Gradient frame at the requested resolution; the blue channel advances every capture. |
//! | IMU          | Gravity along +z, slow yaw rate, identity orientation, 60 Hz sim time. |
//! | Articulation | Configured joint names; positions follow a sine of the capture count. |
//!
//! Faults can be switched on and off per path at any time, including after
//! the producer was handed to a source.
//!
//! # Example
//!
//! ```rust
//! use foxbridge_sources::{CameraProducer, ProducerFactory, SimProducers};
//!
//! let producers = SimProducers::new();
//! let mut cam = producers.camera("/World/Cam1", 64, 48).unwrap();
//! assert_eq!(cam.capture().unwrap().width, 64);
//!
//! producers.fail_camera("/World/Cam1", true);
//! assert!(cam.capture().is_err());
//! ```

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use foxbridge_types::{BridgeError, CameraFrame, ImuReading, PixelFormat, Quaternion, Vec3};

use crate::producer::{ArticulationProducer, CameraProducer, ImuProducer, ProducerFactory};

const SIM_DT: f64 = 1.0 / 60.0;

#[derive(Debug, Default)]
struct Faults {
    camera: HashSet<String>,
    imu: HashSet<String>,
    invalid_imu: HashSet<String>,
    articulation: HashSet<String>,
}

#[derive(Debug, Clone, Default)]
struct SharedFaults(Arc<Mutex<Faults>>);

impl SharedFaults {
    fn set(&self, pick: impl FnOnce(&mut Faults) -> &mut HashSet<String>, path: &str, on: bool) {
        let mut faults = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        let set = pick(&mut faults);
        if on {
            set.insert(path.to_string());
        } else {
            set.remove(path);
        }
    }

    fn has(&self, pick: impl FnOnce(&Faults) -> &HashSet<String>, path: &str) -> bool {
        let faults = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        pick(&faults).contains(path)
    }
}

fn fault(component: &str, details: &str) -> BridgeError {
    BridgeError::HardwareFault {
        component: component.to_string(),
        details: details.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stub camera
// ─────────────────────────────────────────────────────────────────────────────

struct SimCamera {
    path: String,
    width: u32,
    height: u32,
    format: PixelFormat,
    frame: u32,
    faults: SharedFaults,
}

impl CameraProducer for SimCamera {
    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn capture(&mut self) -> Result<CameraFrame, BridgeError> {
        if self.faults.has(|f| &f.camera, &self.path) {
            return Err(fault(&self.path, "render product unavailable"));
        }
        self.frame = self.frame.wrapping_add(1);
        let bpp = self.format.bytes_per_pixel();
        let mut data = Vec::with_capacity(self.width as usize * self.height as usize * bpp);
        for y in 0..self.height {
            for x in 0..self.width {
                data.push((x * 255 / self.width.max(1)) as u8);
                data.push((y * 255 / self.height.max(1)) as u8);
                data.push((self.frame % 256) as u8);
                if self.format == PixelFormat::Rgba8 {
                    data.push(255);
                }
            }
        }
        Ok(CameraFrame {
            width: self.width,
            height: self.height,
            format: self.format,
            data,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stub IMU
// ─────────────────────────────────────────────────────────────────────────────

struct SimImu {
    path: String,
    samples: u64,
    faults: SharedFaults,
}

impl ImuProducer for SimImu {
    fn reading(&mut self) -> Result<ImuReading, BridgeError> {
        if self.faults.has(|f| &f.imu, &self.path) {
            return Err(fault(&self.path, "imu query failed"));
        }
        self.samples += 1;
        Ok(ImuReading {
            is_valid: !self.faults.has(|f| &f.invalid_imu, &self.path),
            angular_velocity: Vec3::new(0.0, 0.0, 0.1),
            linear_acceleration: Vec3::new(0.0, 0.0, 9.81),
            orientation: Quaternion::identity(),
            time: self.samples as f64 * SIM_DT,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stub articulation
// ─────────────────────────────────────────────────────────────────────────────

struct SimArticulation {
    path: String,
    joints: Vec<String>,
    samples: u64,
    faults: SharedFaults,
}

impl SimArticulation {
    fn check(&self) -> Result<(), BridgeError> {
        if self.faults.has(|f| &f.articulation, &self.path) {
            Err(fault(&self.path, "articulation view invalidated"))
        } else {
            Ok(())
        }
    }
}

impl ArticulationProducer for SimArticulation {
    fn dof_names(&mut self) -> Result<Vec<String>, BridgeError> {
        self.check()?;
        self.samples += 1;
        Ok(self.joints.clone())
    }

    fn joint_positions(&mut self) -> Result<Vec<f64>, BridgeError> {
        self.check()?;
        let t = self.samples as f64 * SIM_DT;
        Ok((0..self.joints.len()).map(|i| (t + i as f64).sin()).collect())
    }

    fn joint_velocities(&mut self) -> Result<Vec<f64>, BridgeError> {
        self.check()?;
        let t = self.samples as f64 * SIM_DT;
        Ok((0..self.joints.len()).map(|i| (t + i as f64).cos()).collect())
    }

    fn measured_efforts(&mut self) -> Result<Vec<f64>, BridgeError> {
        self.check()?;
        Ok(vec![0.0; self.joints.len()])
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SimProducers factory
// ─────────────────────────────────────────────────────────────────────────────

/// A [`ProducerFactory`] backed by in-process stubs with switchable faults.
#[derive(Debug, Clone)]
pub struct SimProducers {
    joints: Vec<String>,
    format: PixelFormat,
    faults: SharedFaults,
}

impl SimProducers {
    /// Stubs with two joints per articulation and RGB frames.
    pub fn new() -> Self {
        Self {
            joints: vec!["joint_0".to_string(), "joint_1".to_string()],
            format: PixelFormat::Rgb8,
            faults: SharedFaults::default(),
        }
    }

    /// Joint names reported by every articulation created afterwards.
    pub fn with_joints<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.joints = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_pixel_format(mut self, format: PixelFormat) -> Self {
        self.format = format;
        self
    }

    /// Make captures of the camera at `path` fail (or succeed again).
    pub fn fail_camera(&self, path: &str, on: bool) {
        self.faults.set(|f| &mut f.camera, path, on);
    }

    pub fn fail_imu(&self, path: &str, on: bool) {
        self.faults.set(|f| &mut f.imu, path, on);
    }

    /// Report readings from the IMU at `path` as not valid.
    pub fn invalidate_imu(&self, path: &str, on: bool) {
        self.faults.set(|f| &mut f.invalid_imu, path, on);
    }

    pub fn fail_articulation(&self, path: &str, on: bool) {
        self.faults.set(|f| &mut f.articulation, path, on);
    }
}

impl Default for SimProducers {
    fn default() -> Self {
        Self::new()
    }
}

impl ProducerFactory for SimProducers {
    fn camera(&self, path: &str, width: u32, height: u32) -> Result<Box<dyn CameraProducer>, BridgeError> {
        if width == 0 || height == 0 {
            return Err(fault(path, &format!("invalid resolution {width}x{height}")));
        }
        Ok(Box::new(SimCamera {
            path: path.to_string(),
            width,
            height,
            format: self.format,
            frame: 0,
            faults: self.faults.clone(),
        }))
    }

    fn imu(&self, path: &str) -> Result<Box<dyn ImuProducer>, BridgeError> {
        Ok(Box::new(SimImu {
            path: path.to_string(),
            samples: 0,
            faults: self.faults.clone(),
        }))
    }

    fn articulation(&self, path: &str) -> Result<Box<dyn ArticulationProducer>, BridgeError> {
        Ok(Box::new(SimArticulation {
            path: path.to_string(),
            joints: self.joints.clone(),
            samples: 0,
            faults: self.faults.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_frames_match_resolution_and_format() {
        let producers = SimProducers::new().with_pixel_format(PixelFormat::Rgba8);
        let mut cam = producers.camera("/c", 5, 3).unwrap();
        let frame = cam.capture().unwrap();
        assert_eq!(cam.resolution(), (5, 3));
        assert_eq!(frame.data.len(), 5 * 3 * 4);
    }

    #[test]
    fn zero_resolution_is_refused() {
        assert!(SimProducers::new().camera("/c", 0, 10).is_err());
    }

    #[test]
    fn faults_are_per_path_and_reversible() {
        let producers = SimProducers::new();
        let mut a = producers.imu("/a").unwrap();
        let mut b = producers.imu("/b").unwrap();
        producers.fail_imu("/a", true);
        assert!(a.reading().is_err());
        assert!(b.reading().is_ok());
        producers.fail_imu("/a", false);
        assert!(a.reading().is_ok());
    }

    #[test]
    fn imu_time_advances() {
        let producers = SimProducers::new();
        let mut imu = producers.imu("/imu").unwrap();
        let first = imu.reading().unwrap().time;
        let second = imu.reading().unwrap().time;
        assert!(second > first);
    }

    #[test]
    fn articulation_sequences_are_aligned() {
        let producers = SimProducers::new().with_joints(["a", "b", "c"]);
        let mut art = producers.articulation("/robot").unwrap();
        assert_eq!(art.dof_names().unwrap().len(), 3);
        assert_eq!(art.joint_positions().unwrap().len(), 3);
        assert_eq!(art.measured_efforts().unwrap(), vec![0.0; 3]);
    }
}
