//! `foxbridge-runtime` – wiring and process plumbing.
//!
//! # Modules
//!
//! - [`bridge`] – [`Bridge`]: the source registry and channel manager joined
//!   together behind operator controls and simulator hooks.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: global
//!   `tracing` subscriber with optional OTLP span export.

pub mod bridge;
pub mod telemetry;

pub use bridge::{Bridge, BridgeSettings};
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
