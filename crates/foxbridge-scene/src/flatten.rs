//! Transform-tree flattening.
//!
//! [`flatten`] walks the subtree below a root node depth-first and emits one
//! [`TransformEntry`] per visited node (the root itself excepted), carrying the
//! node's transform local to its parent.  Children rejected by the
//! [`ExclusionFilter`] are pruned together with their whole subtree.
//!
//! The walk uses an explicit stack, so arbitrarily deep scenes never grow the
//! call stack.
//!
//! Frame ids are local node names, not paths.  Two nodes with the same name in
//! the flattened scope produce the same frame id.

use std::collections::BTreeSet;

use foxbridge_types::Matrix4;

use crate::graph::SceneGraph;

/// One parent → child edge of the flattened tree.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformEntry {
    /// Child pose relative to the parent.
    pub transform: Matrix4,
    pub parent_id: String,
    pub child_id: String,
}

/// Decides which children the flattener descends into.
///
/// A child is excluded when its type name is in the exact-type set, when its
/// type name contains any of the substrings, or when its local name is in the
/// name set.
#[derive(Debug, Clone, Default)]
pub struct ExclusionFilter {
    types: BTreeSet<String>,
    type_substrings: Vec<String>,
    names: BTreeSet<String>,
}

impl ExclusionFilter {
    /// A filter that admits everything.
    pub fn none() -> Self {
        Self::default()
    }

    /// The filter used for the published `/tf` tree: auxiliary graph, scope
    /// and material nodes, anything joint-, sensor- or render-typed, and a
    /// child literally named `Render`.
    pub fn standard() -> Self {
        Self::none()
            .with_type("OmniGraph")
            .with_type("Scope")
            .with_type("Material")
            .with_type_substring("Joint")
            .with_type_substring("Sensor")
            .with_type_substring("Render")
            .with_name("Render")
    }

    pub fn with_type(mut self, type_name: impl Into<String>) -> Self {
        self.types.insert(type_name.into());
        self
    }

    pub fn with_type_substring(mut self, fragment: impl Into<String>) -> Self {
        self.type_substrings.push(fragment.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.names.insert(name.into());
        self
    }

    /// `true` when a node with this type and local name must be pruned.
    pub fn excludes(&self, type_name: &str, name: &str) -> bool {
        self.types.contains(type_name)
            || self
                .type_substrings
                .iter()
                .any(|fragment| type_name.contains(fragment.as_str()))
            || self.names.contains(name)
    }
}

/// Flatten the subtree rooted at `root` into parent-before-child entries.
///
/// Returns an empty list when `root` does not exist.  Sibling order follows
/// [`SceneGraph::children`].
pub fn flatten(scene: &dyn SceneGraph, root: &str, filter: &ExclusionFilter) -> Vec<TransformEntry> {
    let mut entries = Vec::new();
    if !scene.contains(root) {
        return entries;
    }

    // (node path, frame id of its parent); the root has no parent entry.
    let mut stack: Vec<(String, Option<String>)> = vec![(root.to_string(), None)];

    while let Some((path, parent_id)) = stack.pop() {
        let Some(node_id) = scene.name(&path) else {
            continue;
        };

        if let Some(parent_id) = parent_id {
            entries.push(TransformEntry {
                transform: scene.local_transform(&path).unwrap_or_default(),
                parent_id,
                child_id: node_id.clone(),
            });
        }

        // Reverse so the first child is popped (and emitted) first.
        for child in scene.children(&path).into_iter().rev() {
            let type_name = scene.type_name(&child).unwrap_or_default();
            let name = scene.name(&child).unwrap_or_default();
            if !filter.excludes(&type_name, &name) {
                stack.push((child, Some(node_id.clone())));
            }
        }
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimScene;
    use foxbridge_types::{Quaternion, Vec3};

    fn offset(x: f64) -> Matrix4 {
        Matrix4::from_translation_rotation(Vec3::new(x, 0.0, 0.0), Quaternion::identity())
    }

    fn three_level() -> SimScene {
        SimScene::new()
            .with_node("/root", "Xform")
            .with_node("/root/A", "Xform")
            .with_node("/root/A/B", "Mesh")
            .with_local_transform("/root/A", offset(1.0))
            .with_local_transform("/root/A/B", offset(2.0))
    }

    #[test]
    fn three_level_tree_yields_parent_before_child() {
        let scene = three_level();
        let entries = flatten(&scene, "/root", &ExclusionFilter::none());

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].parent_id, "root");
        assert_eq!(entries[0].child_id, "A");
        assert_eq!(entries[0].transform, offset(1.0));
        assert_eq!(entries[1].parent_id, "A");
        assert_eq!(entries[1].child_id, "B");
        assert_eq!(entries[1].transform, offset(2.0));
    }

    #[test]
    fn excluded_type_prunes_node() {
        let scene = three_level();
        let filter = ExclusionFilter::none().with_type("Mesh");
        let entries = flatten(&scene, "/root", &filter);

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].child_id, "A");
    }

    #[test]
    fn excluded_child_prunes_whole_subtree() {
        let scene = SimScene::new()
            .with_node("/World/Robot", "Xform")
            .with_node("/World/Robot/Looks", "Scope")
            .with_node("/World/Robot/Looks/Inner", "Xform")
            .with_node("/World/Robot/Base", "Xform");

        let entries = flatten(&scene, "/World/Robot", &ExclusionFilter::standard());
        let children: Vec<_> = entries.iter().map(|e| e.child_id.as_str()).collect();
        assert_eq!(children, vec!["Base"]);
    }

    #[test]
    fn standard_filter_rules() {
        let filter = ExclusionFilter::standard();
        assert!(filter.excludes("OmniGraph", "graph"));
        assert!(filter.excludes("Material", "steel"));
        assert!(filter.excludes("PhysicsRevoluteJoint", "hinge"));
        assert!(filter.excludes("IsaacImuSensor", "imu"));
        assert!(filter.excludes("RenderProduct", "rp"));
        assert!(filter.excludes("Xform", "Render"));
        assert!(!filter.excludes("Xform", "Base"));
        assert!(!filter.excludes("Camera", "cam"));
    }

    #[test]
    fn frame_ids_are_local_names() {
        let scene = SimScene::new()
            .with_node("/World/Robot", "Xform")
            .with_node("/World/Robot/Base", "Xform")
            .with_node("/World/Robot/Base/Arm", "Xform");

        let entries = flatten(&scene, "/World/Robot", &ExclusionFilter::standard());
        assert_eq!(entries.len(), 2);
        assert_eq!((entries[0].parent_id.as_str(), entries[0].child_id.as_str()), ("Robot", "Base"));
        assert_eq!((entries[1].parent_id.as_str(), entries[1].child_id.as_str()), ("Base", "Arm"));
    }

    #[test]
    fn duplicate_local_names_collide() {
        let scene = SimScene::new()
            .with_node("/r", "Xform")
            .with_node("/r/left/link", "Xform")
            .with_node("/r/right/link", "Xform");

        let entries = flatten(&scene, "/r", &ExclusionFilter::none());
        let links: Vec<_> = entries.iter().filter(|e| e.child_id == "link").collect();
        assert_eq!(links.len(), 2);
    }

    #[test]
    fn siblings_follow_native_order_depth_first() {
        let scene = SimScene::new()
            .with_node("/r", "Xform")
            .with_node("/r/a", "Xform")
            .with_node("/r/a/a1", "Xform")
            .with_node("/r/b", "Xform");

        let entries = flatten(&scene, "/r", &ExclusionFilter::none());
        let order: Vec<_> = entries.iter().map(|e| e.child_id.as_str()).collect();
        assert_eq!(order, vec!["a", "a1", "b"]);
    }

    #[test]
    fn missing_root_yields_nothing() {
        let scene = three_level();
        assert!(flatten(&scene, "/ghost", &ExclusionFilter::none()).is_empty());
    }

    #[test]
    fn deep_chain_does_not_recurse() {
        let mut path = String::from("/n0");
        let mut scene = SimScene::new().with_node(&path, "Xform");
        for i in 1..1_000 {
            path.push_str(&format!("/n{i}"));
            scene = scene.with_node(&path, "Xform");
        }
        let entries = flatten(&scene, "/n0", &ExclusionFilter::none());
        assert_eq!(entries.len(), 999);
    }
}
