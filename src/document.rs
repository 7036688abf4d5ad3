//! Document model seam.
//!
//! The bridge core never owns the live document; it consumes snapshots
//! through [`DocumentModel`] and pushes mutations back through dispatcher
//! handlers. [`InMemoryDocument`] is the reference implementation used by the
//! demo binary and the test suite.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use crate::errors::{BridgeError, Result};
use crate::graph::traversal::neighborhood;
use crate::types::{DocumentSnapshot, NodeInfo, NodeKind, SliderState};

/// The interface the bridge requires of the host application's document.
pub trait DocumentModel: Send + Sync {
    /// Enumerates the live document into a fresh snapshot.
    fn snapshot(&self) -> DocumentSnapshot;

    /// Looks up a single node by id.
    fn find_by_id(&self, id: &str) -> Option<NodeInfo>;

    /// Resolves a sub-element id (e.g. a component's input parameter) to the
    /// id of its owning node, when the document exposes a parent relation.
    fn resolve_owner(&self, id: &str) -> Option<String>;

    /// Ids of the nodes currently selected in the host UI.
    fn selected_ids(&self) -> Vec<String>;
}

/// Expands a set of requested ids into their bounded-depth neighborhood.
///
/// Requested ids that are not snapshot keys are resolved to their owning node
/// via [`DocumentModel::resolve_owner`]; ids that still do not resolve are
/// silently dropped. Every resolved target is marked selected in the returned
/// records, mirroring how the host UI highlights queried nodes.
pub fn query_context(
    doc: &dyn DocumentModel,
    target_ids: &[String],
    depth: i64,
) -> DocumentSnapshot {
    let mut snapshot = doc.snapshot();

    let mut targets: HashSet<String> = HashSet::new();
    for id in target_ids {
        if snapshot.contains_key(id) {
            targets.insert(id.clone());
        } else if let Some(owner) = doc.resolve_owner(id) {
            if snapshot.contains_key(&owner) {
                targets.insert(owner);
            }
        }
    }

    for id in &targets {
        if let Some(node) = snapshot.get_mut(id) {
            node.is_selected = true;
        }
    }

    neighborhood(&snapshot, &targets, depth)
}

#[derive(Default)]
struct DocumentState {
    nodes: HashMap<String, NodeInfo>,
    /// Directed edges, source id -> target id.
    edges: Vec<(String, String)>,
    /// Sub-element id -> owning node id.
    owners: HashMap<String, String>,
    selection: HashSet<String>,
}

/// A self-contained document for hosting the bridge without a real CAD
/// application behind it.
#[derive(Default)]
pub struct InMemoryDocument {
    state: RwLock<DocumentState>,
}

impl InMemoryDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a node. Sources/targets/selection on the given record are
    /// ignored; connectivity lives in the edge list.
    pub fn add_node(&self, node: NodeInfo) {
        let mut state = self.state.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.nodes.insert(node.id.clone(), node);
    }

    /// Connects `source_id` to `target_id`.
    pub fn connect(&self, source_id: &str, target_id: &str) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        if !state.nodes.contains_key(source_id) {
            return Err(BridgeError::NotFound(source_id.to_string()));
        }
        if !state.nodes.contains_key(target_id) {
            return Err(BridgeError::NotFound(target_id.to_string()));
        }
        let edge = (source_id.to_string(), target_id.to_string());
        if !state.edges.contains(&edge) {
            state.edges.push(edge);
        }
        Ok(())
    }

    /// Records that `child_id` is a sub-element owned by `owner_id`.
    pub fn register_owner(&self, child_id: &str, owner_id: &str) {
        let mut state = self.state.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        state
            .owners
            .insert(child_id.to_string(), owner_id.to_string());
    }

    /// Replaces the current selection.
    pub fn select(&self, ids: &[String]) {
        let mut state = self.state.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.selection = ids.iter().cloned().collect();
    }

    /// Moves a slider to `value`, clamped to the slider's range.
    pub fn set_slider_value(&self, id: &str, value: f64) -> Result<SliderState> {
        let mut state = self.state.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        let node = state
            .nodes
            .get_mut(id)
            .ok_or_else(|| BridgeError::NotFound(id.to_string()))?;
        let slider = node
            .slider
            .as_mut()
            .ok_or_else(|| BridgeError::Handler(format!("node '{}' is not a slider", id)))?;
        slider.value = value.clamp(slider.min, slider.max);
        Ok(*slider)
    }

    /// Replaces the text content of a panel node.
    pub fn set_panel_text(&self, id: &str, text: &str) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        let node = state
            .nodes
            .get_mut(id)
            .ok_or_else(|| BridgeError::NotFound(id.to_string()))?;
        if node.kind != NodeKind::Panel {
            return Err(BridgeError::Handler(format!("node '{}' is not a panel", id)));
        }
        node.panel_content = Some(text.to_string());
        Ok(())
    }

    /// Appends a runtime diagnostic message to a node.
    pub fn push_runtime_message(&self, id: &str, message: &str) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        let node = state
            .nodes
            .get_mut(id)
            .ok_or_else(|| BridgeError::NotFound(id.to_string()))?;
        node.runtime_messages.push(message.to_string());
        Ok(())
    }

    fn build_node(state: &DocumentState, id: &str, node: &NodeInfo) -> NodeInfo {
        let mut info = node.clone();
        info.sources = state
            .edges
            .iter()
            .filter(|(_, t)| t == id)
            .map(|(s, _)| s.clone())
            .collect();
        info.targets = state
            .edges
            .iter()
            .filter(|(s, _)| s == id)
            .map(|(_, t)| t.clone())
            .collect();
        info.is_selected = state.selection.contains(id);
        info
    }
}

impl DocumentModel for InMemoryDocument {
    fn snapshot(&self) -> DocumentSnapshot {
        let state = self.state.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        state
            .nodes
            .iter()
            .map(|(id, node)| (id.clone(), Self::build_node(&state, id, node)))
            .collect()
    }

    fn find_by_id(&self, id: &str) -> Option<NodeInfo> {
        let state = self.state.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        state
            .nodes
            .get(id)
            .map(|node| Self::build_node(&state, id, node))
    }

    fn resolve_owner(&self, id: &str) -> Option<String> {
        let state = self.state.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.owners.get(id).cloned()
    }

    fn selected_ids(&self) -> Vec<String> {
        let state = self.state.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.selection.iter().cloned().collect()
    }
}
