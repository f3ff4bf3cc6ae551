//! JSON payload records.
//!
//! Field names are part of the wire contract; Foxglove panels address them
//! by name.  The JSON Schema advertised for each record is derived from the
//! type itself (see [`crate::resolve`]).

use foxbridge_types::ImuReading;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One IMU sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ImuMessage {
    pub ang_vel_x: f64,
    pub ang_vel_y: f64,
    pub ang_vel_z: f64,
    pub lin_acc_x: f64,
    pub lin_acc_y: f64,
    pub lin_acc_z: f64,
    /// Orientation quaternion as `[x, y, z, w]`.
    pub orientation: [f64; 4],
    /// Simulation time in seconds.
    pub time: f64,
}

impl From<&ImuReading> for ImuMessage {
    fn from(r: &ImuReading) -> Self {
        Self {
            ang_vel_x: r.angular_velocity.x,
            ang_vel_y: r.angular_velocity.y,
            ang_vel_z: r.angular_velocity.z,
            lin_acc_x: r.linear_acceleration.x,
            lin_acc_y: r.linear_acceleration.y,
            lin_acc_z: r.linear_acceleration.z,
            orientation: [r.orientation.x, r.orientation.y, r.orientation.z, r.orientation.w],
            time: r.time,
        }
    }
}

/// Joint state of one articulation.  All four vectors are index-aligned.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct JointStatesMessage {
    pub joint_names: Vec<String>,
    pub joint_positions: Vec<f64>,
    pub joint_velocities: Vec<f64>,
    pub joint_efforts: Vec<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use foxbridge_types::{Quaternion, Vec3};

    #[test]
    fn imu_message_orders_orientation_xyzw() {
        let reading = ImuReading {
            is_valid: true,
            angular_velocity: Vec3::new(0.1, 0.2, 0.3),
            linear_acceleration: Vec3::new(0.0, 0.0, 9.81),
            orientation: Quaternion::new(1.0, 0.0, 0.0, 0.0),
            time: 2.5,
        };
        let msg = ImuMessage::from(&reading);
        assert_eq!(msg.orientation, [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(msg.lin_acc_z, 9.81);

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["ang_vel_y"], 0.2);
        assert_eq!(value["time"], 2.5);
    }

    #[test]
    fn joint_states_field_names_are_stable() {
        let msg = JointStatesMessage {
            joint_names: vec!["j0".into()],
            joint_positions: vec![0.5],
            joint_velocities: vec![0.0],
            joint_efforts: vec![1.0],
        };
        let value = serde_json::to_value(&msg).unwrap();
        let keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys.len(), 4);
        assert!(keys.contains(&"joint_efforts".to_string()));
    }
}
