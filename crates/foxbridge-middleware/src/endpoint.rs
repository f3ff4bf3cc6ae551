//! The pub/sub endpoint seam.
//!
//! The Channel Manager never speaks a wire protocol itself.  It talks to a
//! [`PubSubEndpoint`], which owns transport and framing, and listens for
//! [`SubscriptionEvent`]s the endpoint raises when remote clients come and go.
//!
//! - [`FoxgloveServer`][crate::foxglove::FoxgloveServer] – the Foxglove
//!   WebSocket protocol.
//! - [`MemoryEndpoint`][crate::memory::MemoryEndpoint] – in-process, for
//!   tests.

use async_trait::async_trait;
use foxbridge_schema::{DataEncoding, SchemaEncoding, resolve, topic_for};
use foxbridge_types::{BridgeError, SourceKind};

/// Endpoint-assigned channel identifier.
pub type ChannelId = u32;

/// Everything needed to advertise a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelDescriptor {
    pub topic: String,
    pub encoding: DataEncoding,
    pub schema_name: String,
    pub schema: String,
    pub schema_encoding: SchemaEncoding,
}

impl ChannelDescriptor {
    /// Descriptor for the source of `kind` at `path`: schema from the
    /// resolver, topic derived from kind and path.
    ///
    /// # Errors
    ///
    /// Propagates schema resolution failures.
    pub fn for_source(kind: SourceKind, path: &str) -> Result<Self, BridgeError> {
        let schema = resolve(kind)?;
        Ok(Self {
            topic: topic_for(kind, path),
            encoding: schema.encoding,
            schema_name: schema.schema_name,
            schema: schema.schema,
            schema_encoding: schema.schema_encoding,
        })
    }
}

/// Raised by an endpoint when demand for a channel starts or stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionEvent {
    /// The channel gained its first subscriber.
    Subscribed(ChannelId),
    /// The channel lost its last subscriber.
    Unsubscribed(ChannelId),
}

/// A publish/subscribe transport.
///
/// Every call after [`shutdown`][PubSubEndpoint::shutdown] (or after the
/// transport died) fails with [`BridgeError::EndpointClosed`].
#[async_trait]
pub trait PubSubEndpoint: Send + Sync {
    /// Advertise a channel and return its id.
    async fn add_channel(&self, channel: ChannelDescriptor) -> Result<ChannelId, BridgeError>;

    /// Withdraw a channel.  Unknown ids are ignored.
    async fn remove_channel(&self, id: ChannelId) -> Result<(), BridgeError>;

    /// Publish one message to every subscriber of `id`.
    async fn send_message(&self, id: ChannelId, timestamp_ns: u64, payload: &[u8]) -> Result<(), BridgeError>;

    /// Stop serving.  Idempotent.
    async fn shutdown(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_topics_and_encodings() {
        let tf = ChannelDescriptor::for_source(SourceKind::TfTree, "/World").unwrap();
        assert_eq!(tf.topic, "/tf");
        assert_eq!(tf.encoding, DataEncoding::Protobuf);
        assert_eq!(tf.schema_name, "foxglove.FrameTransforms");

        let joints = ChannelDescriptor::for_source(SourceKind::Articulation, "/World/Robot").unwrap();
        assert_eq!(joints.topic, "/World/Robot/joint_states");
        assert_eq!(joints.encoding, DataEncoding::Json);
        assert_eq!(joints.schema_encoding, SchemaEncoding::JsonSchema);

        let cam = ChannelDescriptor::for_source(SourceKind::Camera, "/World/Cam1").unwrap();
        assert_eq!(cam.topic, "/World/Cam1");
        assert_eq!(cam.schema_name, "foxglove.CompressedImage");
    }
}
