//! Namespace: the folder/file tree built on the shared workspace document.
//!
//! Each public mutation is one local transaction: it edits the Loro
//! containers and ends with a single `commit()`. Nothing here coordinates
//! with other peers. Remote edits are merged by Loro on import and reach the
//! caller only through [`Namespace::watch`].
//!
//! Sibling-name checks run against the local view at call time, so two
//! peers can still admit the same name concurrently.

use crate::document::{DocumentError, WorkspaceDoc};
use crate::events::{EventBus, NamespaceEvent};
use crate::node::{
    ContentRef, Node, NodeId, NodeKind, NodeType, ROOT_ID, new_node_id, now_millis,
};
use loro::event::DiffEvent;
use loro::{
    Container, ContainerTrait, LoroList, LoroMap, LoroText, LoroValue, ValueOrContainer,
};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Key in the `meta` map recording when migration ran.
const MIGRATED_AT: &str = "migratedAt";

#[derive(Debug, Error)]
pub enum NamespaceError {
    #[error("Name must not be blank")]
    BlankName,

    #[error("An entry named {name:?} already exists in this folder")]
    NameTaken { name: String },

    #[error("Document error: {0}")]
    Document(#[from] DocumentError),
}

impl From<loro::LoroError> for NamespaceError {
    fn from(e: loro::LoroError) -> Self {
        NamespaceError::Document(DocumentError::from(e))
    }
}

pub type Result<T> = std::result::Result<T, NamespaceError>;

/// A broken tree invariant found by [`Namespace::check_invariants`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    MissingRoot,
    MissingRootOrder,
    /// A record under `nodes` that could not be decoded.
    UnreadableNode { id: NodeId },
    /// Non-root node without a parent.
    NoParent { id: NodeId },
    /// `parentId` names a node that does not exist.
    MissingParent { id: NodeId, parent: NodeId },
    /// `parentId` names a file.
    ParentNotFolder { id: NodeId, parent: NodeId },
    /// Node is absent from its parent's child order.
    NotInParentOrder { id: NodeId, parent: NodeId },
    /// Id appears more than once in a child order.
    DuplicateInOrder { folder: NodeId, id: NodeId },
    /// Child order lists an id whose node is missing or has another parent.
    StrayInOrder { folder: NodeId, id: NodeId },
    /// File whose text container cannot be found.
    MissingContent { id: NodeId },
}

/// Keeps Loro change subscriptions alive; dropping it stops notifications.
pub struct Watch {
    _subscriptions: Vec<loro::Subscription>,
}

/// The hierarchical namespace over a [`WorkspaceDoc`].
pub struct Namespace {
    doc: WorkspaceDoc,
    events: Arc<EventBus>,
}

impl Namespace {
    pub fn new(doc: WorkspaceDoc) -> Self {
        Self::with_events(doc, Arc::new(EventBus::new()))
    }

    pub fn with_events(doc: WorkspaceDoc, events: Arc<EventBus>) -> Self {
        Self { doc, events }
    }

    pub fn doc(&self) -> &WorkspaceDoc {
        &self.doc
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    // ========== Bootstrap ==========

    /// Create the root folder and its child order if absent.
    ///
    /// Safe to call on every startup. Returns true if anything was written.
    pub fn ensure_root(&self) -> Result<bool> {
        let mut changed = false;

        // Mergeable, so peers that bootstrap before their first sync share one root.
        if !self.contains(ROOT_ID) {
            let record = self.doc.nodes().ensure_mergeable_map(ROOT_ID)?;
            Node::root(now_millis()).write_to(&record)?;
            changed = true;
        }
        if self.order(ROOT_ID).is_none() {
            self.ensure_order(ROOT_ID)?;
            changed = true;
        }

        if changed {
            self.doc.commit();
            info!("Initialized namespace root");
        }
        Ok(changed)
    }

    /// Convert the legacy flat `name -> text` map into files under root.
    ///
    /// Runs only while the tree holds nothing but the root, the legacy map
    /// is non-empty, and no earlier migration left its marker. The legacy
    /// text containers are referenced, not copied. Returns the number of
    /// files created.
    pub fn migrate(&self) -> Result<usize> {
        self.ensure_root()?;

        if self.doc.nodes().len() > 1 {
            return Ok(0);
        }
        if self.doc.meta().get(MIGRATED_AT).is_some() {
            debug!("Legacy migration already ran");
            return Ok(0);
        }
        let legacy = self.doc.legacy_files();
        if legacy.is_empty() {
            return Ok(0);
        }

        let mut names = Vec::new();
        legacy.for_each(|name, value| match value {
            ValueOrContainer::Container(Container::Text(_)) => names.push(name.to_string()),
            _ => warn!("Skipping legacy entry {:?}: not a text container", name),
        });
        names.sort();

        let mut taken = self.sibling_names(ROOT_ID, None);
        let root_order = self.ensure_order(ROOT_ID)?;
        let now = now_millis();

        for key in &names {
            let name = unique_name(key, &taken);
            taken.insert(name.clone());
            let node = Node {
                id: new_node_id(),
                name,
                parent_id: Some(ROOT_ID.to_string()),
                created_at: now,
                updated_at: now,
                kind: NodeKind::File {
                    content: ContentRef::Legacy(key.clone()),
                },
            };
            let record = self.doc.nodes().insert_container(&node.id, LoroMap::new())?;
            node.write_to(&record)?;
            root_order.push(LoroValue::from(node.id.as_str()))?;
        }

        self.doc.meta().insert(MIGRATED_AT, now)?;
        self.doc.commit();

        info!("Migrated {} legacy file(s) into the tree", names.len());
        self.events.emit(NamespaceEvent::Migrated {
            count: names.len(),
            timestamp: now,
        });
        Ok(names.len())
    }

    /// Create a default empty file if root has no children.
    pub fn ensure_initial_file(&self, name: &str) -> Result<Option<NodeId>> {
        self.ensure_root()?;
        if !self.children(ROOT_ID).is_empty() {
            return Ok(None);
        }
        self.create_file(ROOT_ID, name)
    }

    /// `ensure_root`, then `migrate`, then `ensure_initial_file`.
    pub fn bootstrap(&self, initial_file_name: &str) -> Result<()> {
        self.ensure_root()?;
        self.migrate()?;
        self.ensure_initial_file(initial_file_name)?;
        Ok(())
    }

    // ========== Mutations ==========

    /// Create a folder under `parent_id`.
    ///
    /// Returns `None` if the parent no longer exists or is not a folder.
    pub fn create_folder(&self, parent_id: &str, name: &str) -> Result<Option<NodeId>> {
        self.create_node(parent_id, name, NodeType::Folder)
    }

    /// Create an empty file under `parent_id`.
    ///
    /// Returns `None` if the parent no longer exists or is not a folder.
    pub fn create_file(&self, parent_id: &str, name: &str) -> Result<Option<NodeId>> {
        self.create_node(parent_id, name, NodeType::File)
    }

    fn create_node(&self, parent_id: &str, name: &str, node_type: NodeType) -> Result<Option<NodeId>> {
        let name = name.trim();
        if name.is_empty() {
            return Err(NamespaceError::BlankName);
        }
        match self.node(parent_id) {
            Some(parent) if parent.is_folder() => {}
            _ => {
                debug!("Create skipped: parent {} is not an existing folder", parent_id);
                return Ok(None);
            }
        }

        let name = unique_name(name, &self.sibling_names(parent_id, None));
        let now = now_millis();
        let node = Node {
            id: new_node_id(),
            name,
            parent_id: Some(parent_id.to_string()),
            created_at: now,
            updated_at: now,
            kind: match node_type {
                NodeType::File => NodeKind::File {
                    content: ContentRef::Owned,
                },
                NodeType::Folder => NodeKind::Folder,
            },
        };

        let record = self.doc.nodes().insert_container(&node.id, LoroMap::new())?;
        node.write_to(&record)?;
        match node_type {
            NodeType::File => {
                self.doc
                    .file_contents()
                    .insert_container(&node.id, LoroText::new())?;
            }
            NodeType::Folder => {
                self.ensure_order(&node.id)?;
            }
        }
        self.ensure_order(parent_id)?
            .push(LoroValue::from(node.id.as_str()))?;
        self.doc.commit();

        debug!("Created {:?} {:?} ({}) in {}", node_type, node.name, node.id, parent_id);
        self.events.emit(NamespaceEvent::NodeCreated {
            id: node.id.clone(),
            node_type,
            parent_id: parent_id.to_string(),
            timestamp: now,
        });
        Ok(Some(node.id))
    }

    /// Rename a node.
    ///
    /// Returns `Ok(false)` for a blank or unchanged name, the root, or a node
    /// that no longer exists. A name held by a sibling is an error and
    /// leaves the node untouched.
    pub fn rename(&self, id: &str, new_name: &str) -> Result<bool> {
        let next = new_name.trim();
        let Some(node) = self.node(id) else {
            return Ok(false);
        };
        if node.is_root() || next.is_empty() || next == node.name {
            return Ok(false);
        }
        if let Some(parent) = node.parent_id.as_deref() {
            if self.sibling_names(parent, Some(id)).contains(next) {
                return Err(NamespaceError::NameTaken {
                    name: next.to_string(),
                });
            }
        }
        let Some(record) = self.record(id) else {
            return Ok(false);
        };

        let now = now_millis();
        record.insert("name", next)?;
        record.insert("updatedAt", now)?;
        self.doc.commit();

        debug!("Renamed {} from {:?} to {:?}", id, node.name, next);
        self.events.emit(NamespaceEvent::NodeRenamed {
            id: id.to_string(),
            from: node.name,
            to: next.to_string(),
            timestamp: now,
        });
        Ok(true)
    }

    /// Delete a node; folders take their whole subtree with them.
    ///
    /// Two phases: collect every descendant id first, then mutate, so no
    /// child order is edited while it is being walked. Returns `Ok(false)`
    /// for the root or a node that no longer exists.
    pub fn delete(&self, id: &str) -> Result<bool> {
        if id == ROOT_ID {
            return Ok(false);
        }
        let Some(node) = self.node(id) else {
            return Ok(false);
        };

        let doomed = self.collect_subtree(id);

        if let Some(parent) = node.parent_id.as_deref() {
            if let Some(order) = self.order(parent) {
                remove_from_order(&order, id)?;
            }
        }

        let nodes = self.doc.nodes();
        let children = self.doc.children();
        let contents = self.doc.file_contents();
        for victim in &doomed {
            if let Some(NodeKind::File {
                content: ContentRef::Legacy(key),
            }) = self.node(victim).map(|n| n.kind)
            {
                let legacy = self.doc.legacy_files();
                if legacy.get(&key).is_some() {
                    legacy.delete(&key)?;
                }
            }
            if contents.get(victim).is_some() {
                contents.delete(victim)?;
            }
            if children.get(victim).is_some() {
                children.delete(victim)?;
            }
            if nodes.get(victim).is_some() {
                nodes.delete(victim)?;
            }
        }
        self.doc.commit();

        debug!("Deleted {} node(s) rooted at {}", doomed.len(), id);
        self.events.emit(NamespaceEvent::NodesDeleted {
            ids: doomed,
            timestamp: now_millis(),
        });
        Ok(true)
    }

    /// Move a node into another folder, appending it to that folder's order.
    ///
    /// Rejected with `Ok(false)` and no state change when the target is the
    /// node itself or one of its descendants, when either node is missing,
    /// when the target is not a folder, or when moving the root.
    pub fn move_node(&self, id: &str, new_parent_id: &str) -> Result<bool> {
        if id == new_parent_id || id == ROOT_ID {
            debug!("Rejected move of {} into {}", id, new_parent_id);
            return Ok(false);
        }
        let Some(node) = self.node(id) else {
            return Ok(false);
        };
        match self.node(new_parent_id) {
            Some(target) if target.is_folder() => {}
            _ => return Ok(false),
        }
        if self.is_ancestor(id, new_parent_id) {
            debug!("Rejected move of {} into its own subtree ({})", id, new_parent_id);
            return Ok(false);
        }
        let Some(record) = self.record(id) else {
            return Ok(false);
        };

        if let Some(old_parent) = node.parent_id.as_deref() {
            if let Some(order) = self.order(old_parent) {
                remove_from_order(&order, id)?;
            }
        }
        let order = self.ensure_order(new_parent_id)?;
        remove_from_order(&order, id)?;
        order.push(LoroValue::from(id))?;

        let now = now_millis();
        record.insert("parentId", new_parent_id)?;
        record.insert("updatedAt", now)?;
        self.doc.commit();

        debug!("Moved {} from {:?} to {}", id, node.parent_id, new_parent_id);
        self.events.emit(NamespaceEvent::NodeMoved {
            id: id.to_string(),
            from: node.parent_id,
            to: new_parent_id.to_string(),
            timestamp: now,
        });
        Ok(true)
    }

    // ========== Queries ==========

    pub fn contains(&self, id: &str) -> bool {
        self.doc.nodes().get(id).is_some()
    }

    /// Number of node records, root included.
    pub fn len(&self) -> usize {
        self.doc.nodes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc.nodes().is_empty()
    }

    /// Look up a node. Unreadable records are treated as absent.
    pub fn node(&self, id: &str) -> Option<Node> {
        let record = self.record(id)?;
        match Node::read_from(&record) {
            Ok(node) => Some(node),
            Err(e) => {
                warn!("Unreadable node record {}: {}", id, e);
                None
            }
        }
    }

    /// All readable nodes, in no particular order.
    pub fn nodes(&self) -> Vec<Node> {
        let mut ids = Vec::new();
        self.doc.nodes().for_each(|id, _| ids.push(id.to_string()));
        ids.iter().filter_map(|id| self.node(id)).collect()
    }

    /// Child ids of a folder in persisted insertion order.
    pub fn children(&self, folder_id: &str) -> Vec<NodeId> {
        self.order(folder_id)
            .map(|order| order_ids(&order))
            .unwrap_or_default()
    }

    /// Children of a folder sorted by name for display. Never persisted.
    pub fn sorted_children(&self, folder_id: &str) -> Vec<Node> {
        let mut nodes: Vec<Node> = self
            .children(folder_id)
            .iter()
            .filter_map(|id| self.node(id))
            .collect();
        nodes.sort_by(|a, b| {
            a.name
                .to_lowercase()
                .cmp(&b.name.to_lowercase())
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a.id.cmp(&b.id))
        });
        nodes
    }

    /// Collaborative text of a file, following its content reference.
    pub fn content(&self, id: &str) -> Option<LoroText> {
        let node = self.node(id)?;
        let NodeKind::File { content } = node.kind else {
            return None;
        };
        let value = match content {
            ContentRef::Owned => self.doc.file_contents().get(id),
            ContentRef::Legacy(key) => self.doc.legacy_files().get(&key),
        };
        match value {
            Some(ValueOrContainer::Container(Container::Text(text))) => Some(text),
            _ => None,
        }
    }

    /// Slash-separated path from (but excluding) the root.
    pub fn path_of(&self, id: &str) -> Option<String> {
        let mut parts = Vec::new();
        let mut seen = HashSet::new();
        let mut current = self.node(id)?;
        while !current.is_root() {
            if !seen.insert(current.id.clone()) {
                return None;
            }
            let parent = current.parent_id.clone()?;
            parts.push(current.name);
            current = self.node(&parent)?;
        }
        parts.reverse();
        Some(parts.join("/"))
    }

    /// First file in display order (depth-first, name-sorted).
    pub fn first_file(&self) -> Option<NodeId> {
        self.first_file_under(ROOT_ID, &mut HashSet::new())
    }

    fn first_file_under(&self, folder: &str, seen: &mut HashSet<NodeId>) -> Option<NodeId> {
        if !seen.insert(folder.to_string()) {
            return None;
        }
        for child in self.sorted_children(folder) {
            if child.is_file() {
                return Some(child.id);
            }
            if let Some(found) = self.first_file_under(&child.id, seen) {
                return Some(found);
            }
        }
        None
    }

    /// Check every tree invariant against the current local state.
    pub fn check_invariants(&self) -> Vec<Violation> {
        let mut violations = Vec::new();

        match self.node(ROOT_ID) {
            Some(root) if root.is_folder() && root.parent_id.is_none() => {}
            _ => violations.push(Violation::MissingRoot),
        }
        if self.order(ROOT_ID).is_none() {
            violations.push(Violation::MissingRootOrder);
        }

        let mut ids = Vec::new();
        self.doc.nodes().for_each(|id, _| ids.push(id.to_string()));

        for id in &ids {
            let Some(node) = self.node(id) else {
                violations.push(Violation::UnreadableNode { id: id.clone() });
                continue;
            };
            if node.is_file() && self.content(id).is_none() {
                violations.push(Violation::MissingContent { id: id.clone() });
            }
            if node.is_root() {
                continue;
            }
            let Some(parent) = node.parent_id.clone() else {
                violations.push(Violation::NoParent { id: id.clone() });
                continue;
            };
            match self.node(&parent) {
                None => violations.push(Violation::MissingParent {
                    id: id.clone(),
                    parent,
                }),
                Some(p) if !p.is_folder() => violations.push(Violation::ParentNotFolder {
                    id: id.clone(),
                    parent,
                }),
                Some(_) => {
                    if !self.children(&parent).contains(id) {
                        violations.push(Violation::NotInParentOrder {
                            id: id.clone(),
                            parent,
                        });
                    }
                }
            }
        }

        let mut folders = Vec::new();
        self.doc.children().for_each(|id, _| folders.push(id.to_string()));
        for folder in folders {
            let mut seen = HashSet::new();
            for child in self.children(&folder) {
                if !seen.insert(child.clone()) {
                    violations.push(Violation::DuplicateInOrder {
                        folder: folder.clone(),
                        id: child,
                    });
                    continue;
                }
                let in_place = self
                    .node(&child)
                    .is_some_and(|n| n.parent_id.as_deref() == Some(folder.as_str()));
                if !in_place {
                    violations.push(Violation::StrayInOrder {
                        folder: folder.clone(),
                        id: child,
                    });
                }
            }
        }

        violations
    }

    /// Forward deep changes of `nodes` and `children` to the event bus.
    ///
    /// Local commits and imported remote updates both trigger it; there is no
    /// separate apply path for remote edits.
    pub fn watch(&self) -> Watch {
        let containers = [self.doc.nodes().id(), self.doc.children().id()];
        let subscriptions = containers
            .iter()
            .map(|container| {
                let events = Arc::clone(&self.events);
                self.doc.loro().subscribe(
                    container,
                    Arc::new(move |event: DiffEvent<'_>| {
                        let remote = event.triggered_by.is_import();
                        events.emit(NamespaceEvent::TreeChanged {
                            remote,
                            timestamp: now_millis(),
                        });
                    }),
                )
            })
            .collect();
        Watch {
            _subscriptions: subscriptions,
        }
    }

    // ========== Helpers ==========

    fn record(&self, id: &str) -> Option<LoroMap> {
        match self.doc.nodes().get(id)? {
            ValueOrContainer::Container(Container::Map(record)) => Some(record),
            _ => None,
        }
    }

    fn order(&self, folder_id: &str) -> Option<LoroList> {
        match self.doc.children().get(folder_id)? {
            ValueOrContainer::Container(Container::List(list)) => Some(list),
            _ => None,
        }
    }

    /// The folder's child order, created as a mergeable list if absent.
    ///
    /// Orders written by older documents as plain child lists are reused.
    fn ensure_order(&self, folder_id: &str) -> Result<LoroList> {
        if let Some(order) = self.order(folder_id) {
            return Ok(order);
        }
        Ok(self.doc.children().ensure_mergeable_list(folder_id)?)
    }

    /// Names of the locally visible children of `parent_id`.
    fn sibling_names(&self, parent_id: &str, exclude: Option<&str>) -> HashSet<String> {
        self.children(parent_id)
            .iter()
            .filter(|id| Some(id.as_str()) != exclude)
            .filter_map(|id| self.node(id))
            .map(|n| n.name)
            .collect()
    }

    /// Pre-order ids of `id` and everything under it.
    fn collect_subtree(&self, id: &str) -> Vec<NodeId> {
        let mut collected = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![id.to_string()];
        while let Some(current) = stack.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            for child in self.children(&current).into_iter().rev() {
                stack.push(child);
            }
            collected.push(current);
        }
        collected
    }

    /// True if `ancestor` is `id` or lies on `id`'s parent chain.
    fn is_ancestor(&self, ancestor: &str, id: &str) -> bool {
        let mut seen = HashSet::new();
        let mut current = Some(id.to_string());
        while let Some(cur) = current {
            if cur == ancestor {
                return true;
            }
            if !seen.insert(cur.clone()) {
                // Concurrent moves can leave a cycle behind; stop walking.
                return false;
            }
            current = self.node(&cur).and_then(|n| n.parent_id);
        }
        false
    }
}

/// Ids held by a child-order list.
fn order_ids(list: &LoroList) -> Vec<NodeId> {
    let mut ids = Vec::new();
    list.for_each(|value| {
        if let ValueOrContainer::Value(LoroValue::String(s)) = value {
            ids.push(s.to_string());
        }
    });
    ids
}

/// Remove every occurrence of `id` from a child order.
fn remove_from_order(list: &LoroList, id: &str) -> Result<usize> {
    let mut removed = 0;
    // Back to front so earlier indexes stay valid.
    for pos in (0..list.len()).rev() {
        if let Some(ValueOrContainer::Value(LoroValue::String(s))) = list.get(pos) {
            if s.to_string() == id {
                list.delete(pos, 1)?;
                removed += 1;
            }
        }
    }
    Ok(removed)
}

/// `base`, or `base 1`, `base 2`, ... whichever is first not in `taken`.
pub fn unique_name(base: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(base) {
        return base.to_string();
    }
    (1..)
        .map(|i| format!("{} {}", base, i))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| base.to_string())
}
