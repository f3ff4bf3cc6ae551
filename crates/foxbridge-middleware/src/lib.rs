//! `foxbridge-middleware` – Channel publication
//!
//! Turns registry membership into advertised channels and collected payloads
//! into published messages, without caring what the payloads mean.
//!
//! # Modules
//!
//! - [`endpoint`] – The [`PubSubEndpoint`] seam and channel descriptors.
//! - [`manager`] – [`ChannelManager`]: serialized add/remove/dispatch work
//!   against one endpoint, with subscription-driven source enabling.
//! - [`foxglove`] – [`FoxgloveServer`], the `foxglove.websocket.v1` endpoint.
//! - [`memory`] – [`MemoryEndpoint`], an in-process endpoint for tests.

pub mod endpoint;
pub mod foxglove;
pub mod manager;
pub mod memory;

pub use endpoint::{ChannelDescriptor, ChannelId, PubSubEndpoint, SubscriptionEvent};
pub use foxglove::{DEFAULT_PORT, FoxgloveServer};
pub use manager::{ChannelManager, ChannelMap};
pub use memory::{MemoryEndpoint, SentMessage};
