//! Read-time projection of the tree for display.
//!
//! Nothing here is replicated. `TreeViewState` is the per-session selection
//! and collapse state; `project` walks the namespace and yields flat rows in
//! display order.

use crate::namespace::Namespace;
use crate::node::{NodeId, NodeType, ROOT_ID};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// Local-only view state for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeViewState {
    /// Currently open file.
    pub selected: Option<NodeId>,
    /// Folders whose children are hidden.
    pub collapsed: BTreeSet<NodeId>,
}

impl TreeViewState {
    pub fn is_collapsed(&self, folder_id: &str) -> bool {
        folder_id != ROOT_ID && self.collapsed.contains(folder_id)
    }

    /// Flip a folder's collapsed flag. The root never collapses.
    ///
    /// Returns the new state (true = collapsed).
    pub fn toggle(&mut self, folder_id: &str) -> bool {
        if folder_id == ROOT_ID {
            return false;
        }
        if self.collapsed.remove(folder_id) {
            false
        } else {
            self.collapsed.insert(folder_id.to_string());
            true
        }
    }
}

/// One visible line of the tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeRow {
    pub id: NodeId,
    pub name: String,
    /// 0 for the root.
    pub depth: usize,
    pub node_type: NodeType,
    /// Folders only: children are listed below.
    pub expanded: bool,
    /// File is the current selection.
    pub active: bool,
}

/// Flatten the visible tree.
///
/// The root row comes first. Children are name-sorted. A non-empty `filter`
/// hides every entry whose name does not contain it (case-insensitive),
/// together with that entry's subtree.
pub fn project(ns: &Namespace, view: &TreeViewState, filter: &str) -> Vec<TreeRow> {
    let Some(root) = ns.node(ROOT_ID) else {
        return Vec::new();
    };
    let filter = filter.trim().to_lowercase();

    let mut rows = vec![TreeRow {
        id: root.id,
        name: root.name,
        depth: 0,
        node_type: NodeType::Folder,
        expanded: true,
        active: false,
    }];
    let mut seen = HashSet::from([ROOT_ID.to_string()]);
    push_children(ns, view, &filter, ROOT_ID, 1, &mut seen, &mut rows);
    rows
}

fn push_children(
    ns: &Namespace,
    view: &TreeViewState,
    filter: &str,
    folder_id: &str,
    depth: usize,
    seen: &mut HashSet<NodeId>,
    rows: &mut Vec<TreeRow>,
) {
    for child in ns.sorted_children(folder_id) {
        if !filter.is_empty() && !child.name.to_lowercase().contains(filter) {
            continue;
        }
        if !seen.insert(child.id.clone()) {
            continue;
        }
        let node_type = child.node_type();
        let expanded = child.is_folder() && !view.is_collapsed(&child.id);
        let active = child.is_file() && view.selected.as_deref() == Some(child.id.as_str());
        rows.push(TreeRow {
            id: child.id.clone(),
            name: child.name,
            depth,
            node_type,
            expanded,
            active,
        });
        if expanded {
            push_children(ns, view, filter, &child.id, depth + 1, seen, rows);
        }
    }
}
