//! [`SimScene`] – in-memory scene graph for tests and headless runs.
//!
//! Behaves like a live stage as far as the bridge can tell: nodes can be
//! added, removed and re-posed at any time through a shared reference, and
//! every [`SceneGraph`] query sees the latest state.
//!
//! Missing ancestors are created on insert as untyped nodes, the way a stage
//! materialises intermediate prims.
//!
//! # Example
//!
//! ```rust
//! use foxbridge_scene::{SceneGraph, SimScene};
//!
//! let scene = SimScene::new()
//!     .with_node("/World/Cam1", "Camera")
//!     .with_node("/World/Robot", "Xform")
//!     .with_capability("/World/Robot", "PhysicsArticulationRootAPI");
//!
//! assert_eq!(scene.traverse(), vec!["/World", "/World/Cam1", "/World/Robot"]);
//! scene.remove("/World/Cam1");
//! assert!(!scene.contains("/World/Cam1"));
//! ```

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use foxbridge_types::{BridgeError, Matrix4};
use tracing::warn;

use crate::graph::SceneGraph;

const ROOT: &str = "/";

#[derive(Debug, Clone)]
struct SimNode {
    name: String,
    type_name: String,
    capabilities: Vec<String>,
    /// Child paths in insertion order.
    children: Vec<String>,
    local: Matrix4,
}

impl SimNode {
    fn new(name: &str, type_name: &str) -> Self {
        Self {
            name: name.to_string(),
            type_name: type_name.to_string(),
            capabilities: Vec::new(),
            children: Vec::new(),
            local: Matrix4::identity(),
        }
    }
}

/// A mutable, thread-safe, in-memory scene graph.
#[derive(Debug)]
pub struct SimScene {
    nodes: RwLock<BTreeMap<String, SimNode>>,
}

impl SimScene {
    /// Create a scene holding only the pseudo-root `"/"`.
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(ROOT.to_string(), SimNode::new(ROOT, ""));
        Self {
            nodes: RwLock::new(nodes),
        }
    }

    // ── Builder-style helpers ───────────────────────────────────────────────

    /// Add a node (builder-style).  Invalid paths are logged and skipped.
    pub fn with_node(self, path: &str, type_name: &str) -> Self {
        if let Err(e) = self.insert(path, type_name) {
            warn!(path, error = %e, "SimScene: node not added");
        }
        self
    }

    /// Attach a capability (builder-style).
    pub fn with_capability(self, path: &str, capability: &str) -> Self {
        if let Err(e) = self.apply_capability(path, capability) {
            warn!(path, error = %e, "SimScene: capability not applied");
        }
        self
    }

    /// Set a node's local transform (builder-style).
    pub fn with_local_transform(self, path: &str, transform: Matrix4) -> Self {
        if let Err(e) = self.set_local_transform(path, transform) {
            warn!(path, error = %e, "SimScene: transform not set");
        }
        self
    }

    // ── Live mutation ───────────────────────────────────────────────────────

    /// Insert a node at `path`, creating missing ancestors.  Re-inserting an
    /// existing path changes its type and keeps its children.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::UnknownNode`] for relative or malformed paths.
    pub fn insert(&self, path: &str, type_name: &str) -> Result<(), BridgeError> {
        validate(path)?;
        let mut nodes = self.write();
        if let Some(node) = nodes.get_mut(path) {
            node.type_name = type_name.to_string();
            return Ok(());
        }

        // Walk down from the root, materialising ancestors as needed.
        let mut parent = ROOT.to_string();
        let mut current = String::new();
        for element in path.trim_start_matches('/').split('/') {
            current.push('/');
            current.push_str(element);
            if !nodes.contains_key(&current) {
                let node_type = if current == path { type_name } else { "" };
                nodes.insert(current.clone(), SimNode::new(element, node_type));
                if let Some(p) = nodes.get_mut(&parent) {
                    p.children.push(current.clone());
                }
            }
            parent.clone_from(&current);
        }
        Ok(())
    }

    /// Remove the node at `path` and its whole subtree.  Returns `false` when
    /// nothing was there.  The pseudo-root cannot be removed.
    pub fn remove(&self, path: &str) -> bool {
        if path == ROOT {
            return false;
        }
        let mut nodes = self.write();
        if !nodes.contains_key(path) {
            return false;
        }
        if let Some(parent) = nodes.get_mut(&parent_of(path)) {
            parent.children.retain(|c| c != path);
        }
        let mut pending = vec![path.to_string()];
        while let Some(p) = pending.pop() {
            if let Some(node) = nodes.remove(&p) {
                pending.extend(node.children);
            }
        }
        true
    }

    pub fn set_local_transform(&self, path: &str, transform: Matrix4) -> Result<(), BridgeError> {
        let mut nodes = self.write();
        let node = nodes
            .get_mut(path)
            .ok_or_else(|| BridgeError::UnknownNode(path.to_string()))?;
        node.local = transform;
        Ok(())
    }

    pub fn apply_capability(&self, path: &str, capability: &str) -> Result<(), BridgeError> {
        let mut nodes = self.write();
        let node = nodes
            .get_mut(path)
            .ok_or_else(|| BridgeError::UnknownNode(path.to_string()))?;
        if !node.capabilities.iter().any(|c| c == capability) {
            node.capabilities.push(capability.to_string());
        }
        Ok(())
    }

    /// Number of nodes below the pseudo-root.
    pub fn len(&self) -> usize {
        self.read().len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ── Internal helpers ────────────────────────────────────────────────────

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, SimNode>> {
        self.nodes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, SimNode>> {
        self.nodes.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SimScene {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneGraph for SimScene {
    fn root_path(&self) -> String {
        ROOT.to_string()
    }

    fn traverse(&self) -> Vec<String> {
        let nodes = self.read();
        let mut out = Vec::with_capacity(nodes.len());
        let mut stack: Vec<&str> = nodes
            .get(ROOT)
            .map(|root| root.children.iter().rev().map(String::as_str).collect())
            .unwrap_or_default();
        while let Some(path) = stack.pop() {
            out.push(path.to_string());
            if let Some(node) = nodes.get(path) {
                stack.extend(node.children.iter().rev().map(String::as_str));
            }
        }
        out
    }

    fn contains(&self, path: &str) -> bool {
        self.read().contains_key(path)
    }

    fn name(&self, path: &str) -> Option<String> {
        self.read().get(path).map(|n| n.name.clone())
    }

    fn type_name(&self, path: &str) -> Option<String> {
        self.read().get(path).map(|n| n.type_name.clone())
    }

    fn applied_capabilities(&self, path: &str) -> Vec<String> {
        self.read()
            .get(path)
            .map(|n| n.capabilities.clone())
            .unwrap_or_default()
    }

    fn children(&self, path: &str) -> Vec<String> {
        self.read()
            .get(path)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    fn local_transform(&self, path: &str) -> Option<Matrix4> {
        self.read().get(path).map(|n| n.local)
    }
}

fn validate(path: &str) -> Result<(), BridgeError> {
    let well_formed = path.starts_with('/')
        && path.len() > 1
        && !path.ends_with('/')
        && !path.contains("//");
    if well_formed {
        Ok(())
    } else {
        Err(BridgeError::UnknownNode(path.to_string()))
    }
}

fn parent_of(path: &str) -> String {
    match path.rsplit_once('/') {
        Some(("", _)) | None => ROOT.to_string(),
        Some((parent, _)) => parent.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use foxbridge_types::{Quaternion, Vec3};

    #[test]
    fn insert_materialises_ancestors() {
        let scene = SimScene::new().with_node("/World/Robot/Base", "Xform");
        assert_eq!(scene.len(), 3);
        assert_eq!(scene.type_name("/World").as_deref(), Some(""));
        assert_eq!(scene.type_name("/World/Robot/Base").as_deref(), Some("Xform"));
        assert_eq!(scene.children("/World"), vec!["/World/Robot"]);
    }

    #[test]
    fn traverse_is_parent_first_in_insertion_order() {
        let scene = SimScene::new()
            .with_node("/b", "Xform")
            .with_node("/a", "Xform")
            .with_node("/b/x", "Xform");
        assert_eq!(scene.traverse(), vec!["/b", "/b/x", "/a"]);
    }

    #[test]
    fn remove_drops_subtree_and_unlinks_parent() {
        let scene = SimScene::new()
            .with_node("/World/Robot/Base", "Xform")
            .with_node("/World/Cam", "Camera");
        assert!(scene.remove("/World/Robot"));
        assert!(!scene.contains("/World/Robot/Base"));
        assert_eq!(scene.children("/World"), vec!["/World/Cam"]);
        assert!(!scene.remove("/World/Robot"));
        assert!(!scene.remove("/"));
    }

    #[test]
    fn root_is_named_slash() {
        let scene = SimScene::new();
        assert_eq!(scene.name("/").as_deref(), Some("/"));
        assert!(scene.is_empty());
    }

    #[test]
    fn malformed_paths_are_rejected() {
        let scene = SimScene::new();
        assert!(scene.insert("World", "Xform").is_err());
        assert!(scene.insert("/World/", "Xform").is_err());
        assert!(scene.insert("/a//b", "Xform").is_err());
        assert!(scene.is_empty());
    }

    #[test]
    fn capabilities_and_transforms_are_stored() {
        let m = Matrix4::from_translation_rotation(Vec3::new(1.0, 0.0, 0.0), Quaternion::identity());
        let scene = SimScene::new()
            .with_node("/Robot", "Xform")
            .with_capability("/Robot", "PhysicsArticulationRootAPI")
            .with_capability("/Robot", "PhysicsArticulationRootAPI")
            .with_local_transform("/Robot", m);
        assert_eq!(scene.applied_capabilities("/Robot"), vec!["PhysicsArticulationRootAPI"]);
        assert_eq!(scene.local_transform("/Robot"), Some(m));
        assert!(scene.set_local_transform("/ghost", m).is_err());
    }
}
