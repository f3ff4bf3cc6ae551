//! The [`SceneGraph`] collaborator trait.
//!
//! Nodes are addressed by absolute path (`"/World/Robot/Base"`).  The
//! pseudo-root is returned by [`SceneGraph::root_path`] and is never part of
//! [`SceneGraph::traverse`].

use foxbridge_types::Matrix4;

/// Node types that are never offered as transform-tree roots.
const NON_ROOT_TYPES: [&str; 4] = ["OmniGraph", "RenderProduct", "Scope", "Material"];

/// Read-only view of the simulator's scene graph.
///
/// Implementations must be safe to query from the tick thread while the
/// simulator mutates the scene between ticks.
pub trait SceneGraph: Send + Sync {
    /// Path of the pseudo-root, e.g. `"/"`.
    fn root_path(&self) -> String;

    /// Every node below the pseudo-root, parents before children.
    fn traverse(&self) -> Vec<String>;

    /// Whether a node (or the pseudo-root) exists at `path`.
    fn contains(&self, path: &str) -> bool;

    /// The node's local name (last path element).
    fn name(&self, path: &str) -> Option<String>;

    /// Concrete type name, e.g. `"Camera"`, `"Xform"`, `"IsaacImuSensor"`.
    fn type_name(&self, path: &str) -> Option<String>;

    /// Capabilities (applied API schemas) attached to the node, e.g.
    /// `"PhysicsArticulationRootAPI"`.
    fn applied_capabilities(&self, path: &str) -> Vec<String>;

    /// Direct children in native enumeration order.
    fn children(&self, path: &str) -> Vec<String>;

    /// Transform relative to the node's immediate parent.
    fn local_transform(&self, path: &str) -> Option<Matrix4>;
}

/// Paths an operator may pick as the transform-tree root: the pseudo-root
/// plus every node that has children and is not an auxiliary node type.
pub fn tf_root_candidates(scene: &dyn SceneGraph) -> Vec<String> {
    let mut candidates = vec![scene.root_path()];
    for path in scene.traverse() {
        if scene.children(&path).is_empty() {
            continue;
        }
        let type_name = scene.type_name(&path).unwrap_or_default();
        if !NON_ROOT_TYPES.contains(&type_name.as_str()) {
            candidates.push(path);
        }
    }
    candidates
}
