//! Node: a file or folder entry in the namespace.
//!
//! In the document a node is a LoroMap under `nodes[id]` with the fields
//! `{id, type, name, parentId, createdAt, updatedAt}` plus an optional
//! `legacyKey` for files whose text predates the folder model.

use crate::document::{DocumentError, loro_value_to_json};
use loro::{LoroMap, LoroValue};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use web_time::{SystemTime, UNIX_EPOCH};

pub type NodeId = String;

/// Fixed id of the sentinel root folder.
pub const ROOT_ID: &str = "root";
/// Display name of the root folder.
pub const ROOT_NAME: &str = "ROOT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    File,
    Folder,
}

/// Where a file's collaborative text lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentRef {
    /// `fileContents[id]`
    Owned,
    /// `files[key]` in the legacy map. Migrated files keep pointing at their
    /// original text container so its edit history stays intact.
    Legacy(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    File { content: ContentRef },
    Folder,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    /// `None` only for the root.
    pub parent_id: Option<NodeId>,
    /// Milliseconds since Unix epoch.
    pub created_at: i64,
    pub updated_at: i64,
    pub kind: NodeKind,
}

impl Node {
    pub(crate) fn root(now: i64) -> Self {
        Self {
            id: ROOT_ID.to_string(),
            name: ROOT_NAME.to_string(),
            parent_id: None,
            created_at: now,
            updated_at: now,
            kind: NodeKind::Folder,
        }
    }

    pub fn node_type(&self) -> NodeType {
        match self.kind {
            NodeKind::File { .. } => NodeType::File,
            NodeKind::Folder => NodeType::Folder,
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self.kind, NodeKind::File { .. })
    }

    pub fn is_folder(&self) -> bool {
        matches!(self.kind, NodeKind::Folder)
    }

    pub fn is_root(&self) -> bool {
        self.id == ROOT_ID
    }

    /// Write every field of this node into a record map.
    pub(crate) fn write_to(&self, record: &LoroMap) -> Result<(), DocumentError> {
        record.insert("id", self.id.as_str())?;
        record.insert(
            "type",
            match self.node_type() {
                NodeType::File => "file",
                NodeType::Folder => "folder",
            },
        )?;
        record.insert("name", self.name.as_str())?;
        match &self.parent_id {
            Some(parent) => record.insert("parentId", parent.as_str())?,
            None => record.insert("parentId", LoroValue::Null)?,
        }
        record.insert("createdAt", self.created_at)?;
        record.insert("updatedAt", self.updated_at)?;
        if let NodeKind::File {
            content: ContentRef::Legacy(key),
        } = &self.kind
        {
            record.insert("legacyKey", key.as_str())?;
        }
        Ok(())
    }

    /// Decode a record map. Returns an error for records another peer wrote
    /// in a shape we cannot read.
    pub(crate) fn read_from(record: &LoroMap) -> Result<Self, DocumentError> {
        let json = loro_value_to_json(&record.get_deep_value())?;
        let record: NodeRecord = serde_json::from_value(json)
            .map_err(|e| DocumentError::Serialization(e.to_string()))?;
        Ok(record.into())
    }
}

/// Serde shape of a node record, used only for decoding.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeRecord {
    id: String,
    #[serde(rename = "type")]
    node_type: NodeType,
    name: String,
    parent_id: Option<String>,
    #[serde(default)]
    created_at: i64,
    #[serde(default)]
    updated_at: i64,
    #[serde(default)]
    legacy_key: Option<String>,
}

impl From<NodeRecord> for Node {
    fn from(r: NodeRecord) -> Self {
        let kind = match r.node_type {
            NodeType::Folder => NodeKind::Folder,
            NodeType::File => NodeKind::File {
                content: match r.legacy_key {
                    Some(key) => ContentRef::Legacy(key),
                    None => ContentRef::Owned,
                },
            },
        };
        Self {
            id: r.id,
            name: r.name,
            parent_id: r.parent_id,
            created_at: r.created_at,
            updated_at: r.updated_at,
            kind,
        }
    }
}

/// Allocate a fresh node id.
pub(crate) fn new_node_id() -> NodeId {
    format!("n_{}", Uuid::new_v4().simple())
}

/// Current time in milliseconds since Unix epoch.
pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
