//! Tri-state folder selection
//!
//! The remote folder hierarchy is kept in an arena ([`FolderTree`]) whose
//! nodes reference each other by [`NodeId`]. Each node carries a
//! [`SelectionState`] plus a nullable boolean mirror for UI bindings, and
//! separately the choice the user made on that folder, if any.
//!
//! Selections are persisted sparsely as path rows ([`FolderSelection`]):
//! a path's effective selection is the value of its nearest ancestor (or
//! itself) that has a row. [`SelectionScope`] answers that question without
//! building a tree, which is what the scanners and the reconciler need.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::{AccountId, RelativePath, RemoteId};

/// Inclusion state of a folder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionState {
    Checked,
    Unchecked,
    Indeterminate,
}

impl SelectionState {
    pub fn from_selected(selected: bool) -> Self {
        if selected {
            SelectionState::Checked
        } else {
            SelectionState::Unchecked
        }
    }

    /// The nullable boolean mirror (`Indeterminate` → `None`)
    pub fn as_nullable(&self) -> Option<bool> {
        match self {
            SelectionState::Checked => Some(true),
            SelectionState::Unchecked => Some(false),
            SelectionState::Indeterminate => None,
        }
    }

    /// Aggregate a parent's state from its immediate children.
    ///
    /// `prior` is the parent's selection before recomputation. A parent
    /// that was explicitly selected does not collapse to `Unchecked` just
    /// because every child was deselected.
    pub fn aggregate(children: &[SelectionState], prior: Option<bool>) -> SelectionState {
        if children.is_empty() {
            return prior.map_or(SelectionState::Indeterminate, SelectionState::from_selected);
        }
        if children.contains(&SelectionState::Indeterminate) {
            return SelectionState::Indeterminate;
        }
        if children.iter().all(|s| *s == SelectionState::Checked) {
            return SelectionState::Checked;
        }
        if children.iter().all(|s| *s == SelectionState::Unchecked) && prior != Some(true) {
            return SelectionState::Unchecked;
        }
        SelectionState::Indeterminate
    }
}

/// Stable index of a node inside its [`FolderTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// A folder of the remote hierarchy
#[derive(Debug, Clone, PartialEq)]
pub struct FolderNode {
    id: NodeId,
    name: String,
    path: RelativePath,
    remote_id: Option<RemoteId>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    state: SelectionState,
    is_selected: Option<bool>,
    explicit: Option<bool>,
}

impl FolderNode {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &RelativePath {
        &self.path
    }

    pub fn remote_id(&self) -> Option<&RemoteId> {
        self.remote_id.as_ref()
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn state(&self) -> SelectionState {
        self.state
    }

    pub fn is_selected(&self) -> Option<bool> {
        self.is_selected
    }

    /// The value chosen on this folder itself; `None` if it only inherits
    pub fn explicit(&self) -> Option<bool> {
        self.explicit
    }

    fn set_state(&mut self, state: SelectionState) {
        self.state = state;
        self.is_selected = state.as_nullable();
    }
}

/// One persisted selection row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderSelection {
    pub account_id: AccountId,
    pub path: RelativePath,
    pub is_selected: bool,
}

impl FolderSelection {
    pub fn new(account_id: AccountId, path: RelativePath, is_selected: bool) -> Self {
        Self {
            account_id,
            path,
            is_selected,
        }
    }
}

/// Nearest-ancestor lookup over explicit selections.
///
/// Returns the value of the closest path among `path` and its ancestors
/// that has an explicit entry, or `None` if no ancestor has one.
pub fn resolve_inherited(
    explicit: &HashMap<RelativePath, bool>,
    path: &RelativePath,
) -> Option<bool> {
    path.ancestors()
        .find_map(|ancestor| explicit.get(&ancestor).copied())
}

/// Arena tree of remote folders with tri-state selection
#[derive(Debug, Clone, Default)]
pub struct FolderTree {
    nodes: Vec<FolderNode>,
    by_path: HashMap<RelativePath, NodeId>,
    roots: Vec<NodeId>,
}

impl FolderTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn node(&self, id: NodeId) -> Option<&FolderNode> {
        self.nodes.get(id.0)
    }

    pub fn find(&self, path: &RelativePath) -> Option<NodeId> {
        self.by_path.get(path).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FolderNode> {
        self.nodes.iter()
    }

    /// Adds a folder below `parent` (or as a top-level folder).
    ///
    /// New nodes start `Indeterminate`.
    ///
    /// # Errors
    /// Returns error if `parent` is unknown or `path` is already present
    pub fn add_node(
        &mut self,
        parent: Option<NodeId>,
        name: impl Into<String>,
        path: RelativePath,
        remote_id: Option<RemoteId>,
    ) -> Result<NodeId, DomainError> {
        if self.by_path.contains_key(&path) {
            return Err(DomainError::ValidationFailed(format!(
                "folder already in tree: {path}"
            )));
        }
        if let Some(parent) = parent {
            if self.node(parent).is_none() {
                return Err(DomainError::ValidationFailed(format!(
                    "unknown parent node {}",
                    parent.0
                )));
            }
        }

        let id = NodeId(self.nodes.len());
        self.nodes.push(FolderNode {
            id,
            name: name.into(),
            path: path.clone(),
            remote_id,
            parent,
            children: Vec::new(),
            state: SelectionState::Indeterminate,
            is_selected: None,
            explicit: None,
        });
        self.by_path.insert(path, id);

        match parent {
            Some(parent) => self.nodes[parent.0].children.push(id),
            None => self.roots.push(id),
        }
        Ok(id)
    }

    /// Inserts `path` and any missing intermediate folders.
    ///
    /// # Errors
    /// Returns error if `path` is the root
    pub fn insert_path(&mut self, path: &RelativePath) -> Result<NodeId, DomainError> {
        if path.is_root() {
            return Err(DomainError::InvalidPath(
                "the sync root is not a folder node".to_string(),
            ));
        }
        if let Some(id) = self.find(path) {
            return Ok(id);
        }

        let parent = match path.parent() {
            Some(parent) if !parent.is_root() => Some(self.insert_path(&parent)?),
            _ => None,
        };
        let name = path.file_name().unwrap_or_default().to_string();
        self.add_node(parent, name, path.clone(), None)
    }

    /// `id` followed by all its descendants, depth first
    pub fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.node(current) {
                out.push(current);
                stack.extend(node.children.iter().rev());
            }
        }
        out
    }

    /// Selects or deselects `id` and every descendant, then recomputes
    /// the ancestor chain.
    ///
    /// `id` becomes an explicit choice; choices made earlier inside its
    /// subtree are replaced by the cascade.
    ///
    /// # Errors
    /// Returns error if `id` is not in the tree
    pub fn set_selection(&mut self, id: NodeId, selected: bool) -> Result<(), DomainError> {
        let parent = self
            .node(id)
            .ok_or_else(|| DomainError::ValidationFailed(format!("unknown node {}", id.0)))?
            .parent;

        let state = SelectionState::from_selected(selected);
        for node in self.subtree(id) {
            self.nodes[node.0].set_state(state);
            self.nodes[node.0].explicit = None;
        }
        self.nodes[id.0].explicit = Some(selected);

        if let Some(parent) = parent {
            self.update_parent_states(parent);
        }
        Ok(())
    }

    /// Recomputes `id` from its children, then each ancestor up to the root.
    pub fn update_parent_states(&mut self, id: NodeId) {
        let mut current = Some(id);
        while let Some(node_id) = current {
            let Some(node) = self.node(node_id) else {
                return;
            };
            if !node.children.is_empty() {
                let children: Vec<SelectionState> = node
                    .children
                    .iter()
                    .map(|child| self.nodes[child.0].state)
                    .collect();
                let state = SelectionState::aggregate(&children, self.chosen(node_id));
                self.nodes[node_id.0].set_state(state);
            }
            current = self.nodes[node_id.0].parent;
        }
    }

    /// Rebuilds every node's state from sparse saved selections.
    ///
    /// Each node takes the value of its nearest explicit ancestor; nodes
    /// without one stay `Indeterminate`. A top-down pass then marks
    /// `Indeterminate` every node whose subtree mixes selected and
    /// deselected folders.
    pub fn apply_saved_selections(&mut self, saved: &[FolderSelection]) {
        let explicit: HashMap<RelativePath, bool> = saved
            .iter()
            .map(|s| (s.path.clone(), s.is_selected))
            .collect();

        for node in &mut self.nodes {
            node.explicit = explicit.get(&node.path).copied();
            match resolve_inherited(&explicit, &node.path) {
                Some(selected) => node.set_state(SelectionState::from_selected(selected)),
                None => node.set_state(SelectionState::Indeterminate),
            }
        }

        // (has_selected, has_deselected) per subtree, filled children first
        let mut mixed = vec![(false, false); self.nodes.len()];
        for id in self.post_order() {
            let node = &self.nodes[id.0];
            let mut summary = match node.is_selected {
                Some(true) => (true, false),
                Some(false) => (false, true),
                None => (false, false),
            };
            for child in &node.children {
                summary.0 |= mixed[child.0].0;
                summary.1 |= mixed[child.0].1;
            }
            mixed[id.0] = summary;
        }

        for id in self.pre_order() {
            let (has_selected, has_deselected) = mixed[id.0];
            if has_selected && has_deselected {
                self.nodes[id.0].set_state(SelectionState::Indeterminate);
            }
        }
    }

    /// One row per folder carrying an explicit choice, in tree order.
    ///
    /// Aggregated states are not persisted: an explicitly selected parent
    /// keeps its row after a child is deselected.
    pub fn to_selections(&self, account_id: AccountId) -> Vec<FolderSelection> {
        self.pre_order()
            .into_iter()
            .map(|id| &self.nodes[id.0])
            .filter_map(|node| {
                node.explicit
                    .map(|value| FolderSelection::new(account_id, node.path.clone(), value))
            })
            .collect()
    }

    /// Top-most checked folders (descendants of a checked folder omitted)
    pub fn selected_paths(&self) -> Vec<RelativePath> {
        self.pre_order()
            .into_iter()
            .map(|id| &self.nodes[id.0])
            .filter(|node| node.state == SelectionState::Checked)
            .filter(|node| {
                node.parent
                    .map_or(true, |p| self.nodes[p.0].state != SelectionState::Checked)
            })
            .map(|node| node.path.clone())
            .collect()
    }

    /// Nearest explicit choice on `id` or one of its ancestors
    fn chosen(&self, id: NodeId) -> Option<bool> {
        let mut current = Some(id);
        while let Some(node) = current.and_then(|id| self.node(id)) {
            if node.explicit.is_some() {
                return node.explicit;
            }
            current = node.parent;
        }
        None
    }

    fn pre_order(&self) -> Vec<NodeId> {
        self.roots
            .iter()
            .flat_map(|root| self.subtree(*root))
            .collect()
    }

    fn post_order(&self) -> Vec<NodeId> {
        let mut order = self.pre_order();
        order.reverse();
        order
    }
}

/// Path-based sync scope derived from an account's saved selections
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionScope {
    explicit: HashMap<RelativePath, bool>,
}

impl SelectionScope {
    /// A scope with no selections: everything is in scope
    pub fn all() -> Self {
        Self::default()
    }

    pub fn from_selections(selections: &[FolderSelection]) -> Self {
        Self {
            explicit: selections
                .iter()
                .map(|s| (s.path.clone(), s.is_selected))
                .collect(),
        }
    }

    /// True when the account never configured selective sync
    pub fn is_unrestricted(&self) -> bool {
        self.explicit.is_empty()
    }

    /// Nearest explicit selection for `path`
    pub fn resolve(&self, path: &RelativePath) -> Option<bool> {
        resolve_inherited(&self.explicit, path)
    }

    pub fn is_in_scope(&self, path: &RelativePath) -> bool {
        self.is_unrestricted() || self.resolve(path) == Some(true)
    }

    /// True if a remote walk must look inside `folder`: the folder is in
    /// scope itself, or an explicitly selected folder lies below it.
    pub fn should_descend(&self, folder: &RelativePath) -> bool {
        if self.is_in_scope(folder) {
            return true;
        }
        self.explicit
            .iter()
            .any(|(path, selected)| *selected && folder.contains(path))
    }
}
