//! Schema Resolver: maps a [`SourceKind`] to the schema advertised with its
//! channel.
//!
//! | kind           | schema name                | encoding   |
//! |----------------|----------------------------|------------|
//! | `camera`       | `foxglove.CompressedImage` | protobuf   |
//! | `tf_tree`      | `foxglove.FrameTransforms` | protobuf   |
//! | `imu`          | `IMU`                      | json       |
//! | `articulation` | `JointStates`              | json       |

use std::fmt;

use foxbridge_types::{BridgeError, SourceKind};
use schemars::{JsonSchema, schema_for};

use crate::json::{ImuMessage, JointStatesMessage};
use crate::proto::{ProtoFile, encoded_descriptor_set};

/// Encoding of message payloads on a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataEncoding {
    Json,
    Protobuf,
}

impl DataEncoding {
    pub fn as_str(self) -> &'static str {
        match self {
            DataEncoding::Json => "json",
            DataEncoding::Protobuf => "protobuf",
        }
    }
}

impl fmt::Display for DataEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encoding of the schema text itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaEncoding {
    JsonSchema,
    Protobuf,
}

impl SchemaEncoding {
    pub fn as_str(self) -> &'static str {
        match self {
            SchemaEncoding::JsonSchema => "jsonschema",
            SchemaEncoding::Protobuf => "protobuf",
        }
    }
}

impl fmt::Display for SchemaEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a channel advertisement needs besides topic and id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDescriptor {
    pub schema_name: String,
    /// JSON Schema text, or a base64 `FileDescriptorSet` for protobuf.
    pub schema: String,
    pub encoding: DataEncoding,
    pub schema_encoding: SchemaEncoding,
}

impl SchemaDescriptor {
    fn protobuf(schema_name: &str, root: ProtoFile) -> Self {
        Self {
            schema_name: schema_name.to_string(),
            schema: encoded_descriptor_set(root),
            encoding: DataEncoding::Protobuf,
            schema_encoding: SchemaEncoding::Protobuf,
        }
    }

    fn json<T: JsonSchema>(schema_name: &str) -> Result<Self, BridgeError> {
        let schema = serde_json::to_string(&schema_for!(T))
            .map_err(|e| BridgeError::Serialization(format!("{schema_name} schema: {e}")))?;
        Ok(Self {
            schema_name: schema_name.to_string(),
            schema,
            encoding: DataEncoding::Json,
            schema_encoding: SchemaEncoding::JsonSchema,
        })
    }
}

/// Resolve the schema for a source kind.
///
/// # Errors
///
/// Returns [`BridgeError::Serialization`] if a JSON Schema cannot be rendered.
pub fn resolve(kind: SourceKind) -> Result<SchemaDescriptor, BridgeError> {
    match kind {
        SourceKind::Camera => Ok(SchemaDescriptor::protobuf(
            "foxglove.CompressedImage",
            ProtoFile::CompressedImage,
        )),
        SourceKind::TfTree => Ok(SchemaDescriptor::protobuf(
            "foxglove.FrameTransforms",
            ProtoFile::FrameTransforms,
        )),
        SourceKind::Imu => SchemaDescriptor::json::<ImuMessage>("IMU"),
        SourceKind::Articulation => SchemaDescriptor::json::<JointStatesMessage>("JointStates"),
    }
}

/// Topic a source at `path` is published on.
pub fn topic_for(kind: SourceKind, path: &str) -> String {
    match kind {
        SourceKind::TfTree => "/tf".to_string(),
        SourceKind::Articulation => format!("{path}/joint_states"),
        SourceKind::Camera | SourceKind::Imu => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
    use prost::Message;
    use prost_types::FileDescriptorSet;

    #[test]
    fn camera_is_protobuf_compressed_image() {
        let d = resolve(SourceKind::Camera).unwrap();
        assert_eq!(d.schema_name, "foxglove.CompressedImage");
        assert_eq!(d.encoding, DataEncoding::Protobuf);
        assert_eq!(d.schema_encoding.as_str(), "protobuf");

        let bytes = BASE64.decode(&d.schema).unwrap();
        let set = FileDescriptorSet::decode(bytes.as_slice()).unwrap();
        let last = set.file.last().and_then(|f| f.name.clone());
        assert_eq!(last.as_deref(), Some("foxglove/CompressedImage.proto"));
    }

    #[test]
    fn tf_tree_is_protobuf_frame_transforms() {
        let d = resolve(SourceKind::TfTree).unwrap();
        assert_eq!(d.schema_name, "foxglove.FrameTransforms");
        assert_eq!(d.encoding.as_str(), "protobuf");
    }

    #[test]
    fn imu_schema_lists_wire_fields() {
        let d = resolve(SourceKind::Imu).unwrap();
        assert_eq!(d.schema_name, "IMU");
        assert_eq!(d.encoding, DataEncoding::Json);
        assert_eq!(d.schema_encoding.as_str(), "jsonschema");

        let schema: serde_json::Value = serde_json::from_str(&d.schema).unwrap();
        let props = schema["properties"].as_object().unwrap();
        for field in ["ang_vel_x", "lin_acc_z", "orientation", "time"] {
            assert!(props.contains_key(field), "missing {field}");
        }
    }

    #[test]
    fn articulation_schema_is_joint_states() {
        let d = resolve(SourceKind::Articulation).unwrap();
        assert_eq!(d.schema_name, "JointStates");
        let schema: serde_json::Value = serde_json::from_str(&d.schema).unwrap();
        assert!(schema["properties"]["joint_names"].is_object());
    }

    #[test]
    fn topics_by_kind() {
        assert_eq!(topic_for(SourceKind::TfTree, "/World"), "/tf");
        assert_eq!(topic_for(SourceKind::Articulation, "/World/Robot"), "/World/Robot/joint_states");
        assert_eq!(topic_for(SourceKind::Camera, "/World/Cam"), "/World/Cam");
        assert_eq!(topic_for(SourceKind::Imu, "/World/Imu"), "/World/Imu");
    }
}
