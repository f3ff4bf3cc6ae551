//! `foxbridge-scene` – the scene-graph side of the bridge.
//!
//! The simulator owns the scene; the bridge only ever looks at it through the
//! narrow [`SceneGraph`] trait so that the registry can be driven by a live
//! stage, a recorded one, or the in-memory [`SimScene`] used in tests.
//!
//! # Modules
//!
//! - [`graph`] – [`SceneGraph`] collaborator trait and tf-root candidate listing.
//! - [`flatten`] – [`flatten`][flatten::flatten]: turns a filtered subtree
//!   into a flat list of parent/child local transforms.
//! - [`sim`] – [`SimScene`]: a mutable in-memory scene graph.

pub mod flatten;
pub mod graph;
pub mod sim;

pub use flatten::{ExclusionFilter, TransformEntry, flatten};
pub use graph::{SceneGraph, tf_root_candidates};
pub use sim::SimScene;
