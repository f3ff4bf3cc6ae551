//! `foxbridge-schema` – what goes on the wire, and how it is described.
//!
//! Two encodings are in play.  Image and transform payloads are protobuf
//! messages whose schema travels as a base64 `FileDescriptorSet`; IMU and
//! joint-state payloads are JSON records whose schema travels as a JSON
//! Schema document derived from the Rust record type.
//!
//! # Modules
//!
//! - [`proto`] – protobuf message types and the descriptor-set builder.
//! - [`json`] – JSON payload records.
//! - [`resolver`] – [`resolve`]: source kind → [`SchemaDescriptor`].

pub mod json;
pub mod proto;
pub mod resolver;

pub use json::{ImuMessage, JointStatesMessage};
pub use resolver::{DataEncoding, SchemaDescriptor, SchemaEncoding, resolve, topic_for};
