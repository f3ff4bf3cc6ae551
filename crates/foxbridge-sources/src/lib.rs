//! `foxbridge-sources` – the data sources of a live scene.
//!
//! # Modules
//!
//! - [`producer`] – traits for the simulator-side sensor handles.
//! - [`adapter`] – [`Source`] and its per-kind [`SourceAdapter`]s, which turn
//!   one reading into payload bytes.
//! - [`registry`] – [`SourceRegistry`], reconciling sources against the scene
//!   and driving per-tick collection.
//! - [`sink`] – [`ChannelSink`], the registry's outlet towards the channel
//!   manager, plus [`RecordingSink`] for tests.
//! - [`sim`] – [`SimProducers`], stub producers with fault injection.

pub mod adapter;
pub mod producer;
pub mod registry;
pub mod sim;
pub mod sink;

pub use adapter::{Source, SourceAdapter, SourceHandle, encode_jpeg};
pub use producer::{ArticulationProducer, CameraProducer, ImuProducer, ProducerFactory};
pub use registry::{SourceRegistry, classify};
pub use sim::SimProducers;
pub use sink::{ChannelSink, RecordingSink, SinkEvent};
