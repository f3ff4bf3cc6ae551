//! Protobuf messages and their descriptors.
//!
//! The message structs mirror the published Foxglove schemas field for field
//! (same names, same tags), so any Foxglove client decodes them with the
//! descriptor set produced by [`file_descriptor_set`].
//!
//! Descriptors are assembled in code from the [`ProtoFile`] table rather than
//! loaded from `.proto` files at runtime.

use std::collections::HashSet;

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use prost::Message;
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{DescriptorProto, FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet};

// ─────────────────────────────────────────────────────────────────────────────
// Message types
// ─────────────────────────────────────────────────────────────────────────────

pub mod foxglove {
    pub use prost_types::Timestamp;

    /// `foxglove.Vector3`
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Vector3 {
        #[prost(double, tag = "1")]
        pub x: f64,
        #[prost(double, tag = "2")]
        pub y: f64,
        #[prost(double, tag = "3")]
        pub z: f64,
    }

    /// `foxglove.Quaternion`
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Quaternion {
        #[prost(double, tag = "1")]
        pub x: f64,
        #[prost(double, tag = "2")]
        pub y: f64,
        #[prost(double, tag = "3")]
        pub z: f64,
        #[prost(double, tag = "4")]
        pub w: f64,
    }

    /// `foxglove.FrameTransform`
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct FrameTransform {
        #[prost(message, optional, tag = "1")]
        pub timestamp: Option<Timestamp>,
        #[prost(string, tag = "2")]
        pub parent_frame_id: String,
        #[prost(string, tag = "3")]
        pub child_frame_id: String,
        #[prost(message, optional, tag = "4")]
        pub translation: Option<Vector3>,
        #[prost(message, optional, tag = "5")]
        pub rotation: Option<Quaternion>,
    }

    /// `foxglove.FrameTransforms`
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct FrameTransforms {
        #[prost(message, repeated, tag = "1")]
        pub transforms: Vec<FrameTransform>,
    }

    /// `foxglove.CompressedImage`
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct CompressedImage {
        #[prost(message, optional, tag = "1")]
        pub timestamp: Option<Timestamp>,
        #[prost(bytes = "vec", tag = "2")]
        pub data: Vec<u8>,
        #[prost(string, tag = "3")]
        pub format: String,
        #[prost(string, tag = "4")]
        pub frame_id: String,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Descriptor table
// ─────────────────────────────────────────────────────────────────────────────

/// The `.proto` files the bridge publishes messages from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtoFile {
    Timestamp,
    Vector3,
    Quaternion,
    FrameTransform,
    FrameTransforms,
    CompressedImage,
}

impl ProtoFile {
    /// File name as it appears in `import` statements.
    pub fn name(self) -> &'static str {
        match self {
            ProtoFile::Timestamp => "google/protobuf/timestamp.proto",
            ProtoFile::Vector3 => "foxglove/Vector3.proto",
            ProtoFile::Quaternion => "foxglove/Quaternion.proto",
            ProtoFile::FrameTransform => "foxglove/FrameTransform.proto",
            ProtoFile::FrameTransforms => "foxglove/FrameTransforms.proto",
            ProtoFile::CompressedImage => "foxglove/CompressedImage.proto",
        }
    }

    /// Direct imports of this file.
    pub fn dependencies(self) -> &'static [ProtoFile] {
        match self {
            ProtoFile::Timestamp | ProtoFile::Vector3 | ProtoFile::Quaternion => &[],
            ProtoFile::FrameTransform => &[ProtoFile::Quaternion, ProtoFile::Timestamp, ProtoFile::Vector3],
            ProtoFile::FrameTransforms => &[ProtoFile::FrameTransform],
            ProtoFile::CompressedImage => &[ProtoFile::Timestamp],
        }
    }

    fn package(self) -> &'static str {
        match self {
            ProtoFile::Timestamp => "google.protobuf",
            _ => "foxglove",
        }
    }

    fn message(self) -> DescriptorProto {
        match self {
            ProtoFile::Timestamp => message(
                "Timestamp",
                vec![scalar("seconds", 1, Type::Int64), scalar("nanos", 2, Type::Int32)],
            ),
            ProtoFile::Vector3 => message(
                "Vector3",
                vec![
                    scalar("x", 1, Type::Double),
                    scalar("y", 2, Type::Double),
                    scalar("z", 3, Type::Double),
                ],
            ),
            ProtoFile::Quaternion => message(
                "Quaternion",
                vec![
                    scalar("x", 1, Type::Double),
                    scalar("y", 2, Type::Double),
                    scalar("z", 3, Type::Double),
                    scalar("w", 4, Type::Double),
                ],
            ),
            ProtoFile::FrameTransform => message(
                "FrameTransform",
                vec![
                    nested("timestamp", 1, ".google.protobuf.Timestamp", Label::Optional),
                    scalar("parent_frame_id", 2, Type::String),
                    scalar("child_frame_id", 3, Type::String),
                    nested("translation", 4, ".foxglove.Vector3", Label::Optional),
                    nested("rotation", 5, ".foxglove.Quaternion", Label::Optional),
                ],
            ),
            ProtoFile::FrameTransforms => message(
                "FrameTransforms",
                vec![nested("transforms", 1, ".foxglove.FrameTransform", Label::Repeated)],
            ),
            ProtoFile::CompressedImage => message(
                "CompressedImage",
                vec![
                    nested("timestamp", 1, ".google.protobuf.Timestamp", Label::Optional),
                    scalar("frame_id", 4, Type::String),
                    scalar("data", 2, Type::Bytes),
                    scalar("format", 3, Type::String),
                ],
            ),
        }
    }

    /// The `FileDescriptorProto` for this file alone.
    pub fn descriptor(self) -> FileDescriptorProto {
        FileDescriptorProto {
            name: Some(self.name().to_string()),
            package: Some(self.package().to_string()),
            dependency: self
                .dependencies()
                .iter()
                .map(|dep| dep.name().to_string())
                .collect(),
            message_type: vec![self.message()],
            syntax: Some("proto3".to_string()),
            ..Default::default()
        }
    }
}

fn message(name: &str, field: Vec<FieldDescriptorProto>) -> DescriptorProto {
    DescriptorProto {
        name: Some(name.to_string()),
        field,
        ..Default::default()
    }
}

fn scalar(name: &str, number: i32, ty: Type) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.to_string()),
        number: Some(number),
        label: Some(Label::Optional as i32),
        r#type: Some(ty as i32),
        ..Default::default()
    }
}

fn nested(name: &str, number: i32, type_name: &str, label: Label) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.to_string()),
        number: Some(number),
        label: Some(label as i32),
        r#type: Some(Type::Message as i32),
        type_name: Some(type_name.to_string()),
        ..Default::default()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Descriptor sets
// ─────────────────────────────────────────────────────────────────────────────

/// Build the descriptor set for `root` and everything it imports, directly or
/// transitively.
///
/// Every file appears exactly once and always after all of its dependencies.
/// A visited set makes the walk safe against import cycles.
pub fn file_descriptor_set(root: ProtoFile) -> FileDescriptorSet {
    let mut visited = HashSet::new();
    let mut file = Vec::new();
    visited.insert(root);
    append_with_dependencies(root, &mut visited, &mut file);
    FileDescriptorSet { file }
}

fn append_with_dependencies(
    proto: ProtoFile,
    visited: &mut HashSet<ProtoFile>,
    out: &mut Vec<FileDescriptorProto>,
) {
    for &dep in proto.dependencies() {
        if visited.insert(dep) {
            append_with_dependencies(dep, visited, out);
        }
    }
    out.push(proto.descriptor());
}

/// Serialized descriptor set for `root`, base64-encoded for text transport.
pub fn encoded_descriptor_set(root: ProtoFile) -> String {
    BASE64.encode(file_descriptor_set(root).encode_to_vec())
}

#[cfg(test)]
mod tests {
    use super::foxglove::{FrameTransform, FrameTransforms, Quaternion, Vector3};
    use super::*;

    fn names(set: &FileDescriptorSet) -> Vec<&str> {
        set.file.iter().filter_map(|f| f.name.as_deref()).collect()
    }

    #[test]
    fn frame_transforms_set_lists_dependencies_first_and_once() {
        let set = file_descriptor_set(ProtoFile::FrameTransforms);
        assert_eq!(
            names(&set),
            vec![
                "foxglove/Quaternion.proto",
                "google/protobuf/timestamp.proto",
                "foxglove/Vector3.proto",
                "foxglove/FrameTransform.proto",
                "foxglove/FrameTransforms.proto",
            ]
        );
    }

    #[test]
    fn compressed_image_set_has_timestamp_dependency() {
        let set = file_descriptor_set(ProtoFile::CompressedImage);
        assert_eq!(
            names(&set),
            vec!["google/protobuf/timestamp.proto", "foxglove/CompressedImage.proto"]
        );
    }

    #[test]
    fn leaf_file_set_is_itself() {
        let set = file_descriptor_set(ProtoFile::Vector3);
        assert_eq!(names(&set), vec!["foxglove/Vector3.proto"]);
    }

    #[test]
    fn descriptor_declares_its_imports() {
        let fd = ProtoFile::FrameTransform.descriptor();
        assert_eq!(fd.package.as_deref(), Some("foxglove"));
        assert_eq!(fd.dependency.len(), 3);
        assert!(fd.dependency.contains(&"foxglove/Vector3.proto".to_string()));
        let msg = &fd.message_type[0];
        assert_eq!(msg.name.as_deref(), Some("FrameTransform"));
        assert_eq!(msg.field.len(), 5);
    }

    #[test]
    fn encoded_set_decodes_back() -> Result<(), Box<dyn std::error::Error>> {
        let encoded = encoded_descriptor_set(ProtoFile::CompressedImage);
        let bytes = BASE64.decode(encoded)?;
        let set = FileDescriptorSet::decode(bytes.as_slice())?;
        assert_eq!(set, file_descriptor_set(ProtoFile::CompressedImage));
        Ok(())
    }

    #[test]
    fn frame_transforms_message_decodes() -> Result<(), Box<dyn std::error::Error>> {
        let msg = FrameTransforms {
            transforms: vec![FrameTransform {
                timestamp: None,
                parent_frame_id: "Robot".to_string(),
                child_frame_id: "Base".to_string(),
                translation: Some(Vector3 { x: 1.0, y: 0.0, z: 0.0 }),
                rotation: Some(Quaternion { x: 0.0, y: 0.0, z: 0.0, w: 1.0 }),
            }],
        };
        let decoded = FrameTransforms::decode(msg.encode_to_vec().as_slice())?;
        assert_eq!(decoded.transforms[0].child_frame_id, "Base");
        Ok(())
    }
}
