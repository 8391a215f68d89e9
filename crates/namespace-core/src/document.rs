//! WorkspaceDoc: Loro document holding one shared workspace.
//!
//! The namespace lives in five root containers:
//! - `nodes`: LoroMap of node id -> LoroMap node record (one key per field)
//! - `children`: LoroMap of folder id -> LoroList of child ids
//! - `fileContents`: LoroMap of file id -> LoroText
//! - `files`: legacy LoroMap of file name -> LoroText, read once by migration
//! - `meta`: LoroMap for namespace bookkeeping (migration marker)
//!
//! Merging of concurrent edits is entirely Loro's job. This type only names
//! the containers and moves bytes in and out of the document.

use loro::{ExportMode, LoroDoc, LoroMap, VersionVector};
use thiserror::Error;

pub(crate) const NODES: &str = "nodes";
pub(crate) const CHILDREN: &str = "children";
pub(crate) const FILE_CONTENTS: &str = "fileContents";
pub(crate) const LEGACY_FILES: &str = "files";
pub(crate) const META: &str = "meta";

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("Loro error: {0}")]
    Loro(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<loro::LoroError> for DocumentError {
    fn from(e: loro::LoroError) -> Self {
        DocumentError::Loro(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DocumentError>;

/// The replicated document backing a workspace.
///
/// Cloning is cheap and yields a handle to the same underlying document, so a
/// peer transport can hold one while the namespace holds another.
#[derive(Clone)]
pub struct WorkspaceDoc {
    doc: LoroDoc,
}

impl Default for WorkspaceDoc {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkspaceDoc {
    /// Create an empty document with a random peer ID.
    pub fn new() -> Self {
        Self {
            doc: LoroDoc::new(),
        }
    }

    /// Create a document with a fixed peer ID.
    ///
    /// Must be called before any local operation touches the document.
    pub fn with_peer_id(peer_id: u64) -> Result<Self> {
        let doc = LoroDoc::new();
        doc.set_peer_id(peer_id)?;
        Ok(Self { doc })
    }

    /// Create a document by importing a snapshot or update blob.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let doc = LoroDoc::new();
        doc.import(bytes)
            .map_err(|e| DocumentError::Loro(e.to_string()))?;
        Ok(Self { doc })
    }

    /// Underlying Loro document, for transports and content bindings.
    pub fn loro(&self) -> &LoroDoc {
        &self.doc
    }

    pub fn nodes(&self) -> LoroMap {
        self.doc.get_map(NODES)
    }

    pub fn children(&self) -> LoroMap {
        self.doc.get_map(CHILDREN)
    }

    pub fn file_contents(&self) -> LoroMap {
        self.doc.get_map(FILE_CONTENTS)
    }

    /// Legacy flat `name -> text` map from before folders existed.
    pub fn legacy_files(&self) -> LoroMap {
        self.doc.get_map(LEGACY_FILES)
    }

    pub fn meta(&self) -> LoroMap {
        self.doc.get_map(META)
    }

    /// Commit pending changes as one local transaction.
    pub fn commit(&self) {
        self.doc.commit();
    }

    /// Get current version vector
    pub fn version(&self) -> VersionVector {
        self.doc.state_vv()
    }

    /// Export full snapshot
    pub fn export_snapshot(&self) -> Result<Vec<u8>> {
        self.doc
            .export(ExportMode::Snapshot)
            .map_err(|e| DocumentError::Loro(e.to_string()))
    }

    /// Export updates since a version
    pub fn export_updates(&self, from: &VersionVector) -> Result<Vec<u8>> {
        self.doc
            .export(ExportMode::updates(from))
            .map_err(|e| DocumentError::Loro(e.to_string()))
    }

    /// Import a snapshot or update blob received from a peer.
    pub fn import(&self, data: &[u8]) -> Result<()> {
        self.doc
            .import(data)
            .map_err(|e| DocumentError::Loro(e.to_string()))?;
        Ok(())
    }

    /// Pull every operation `other` has that we are missing.
    pub fn merge_from(&self, other: &WorkspaceDoc) -> Result<()> {
        let updates = other.export_updates(&self.version())?;
        self.import(&updates)
    }
}

/// Convert LoroValue to serde_json::Value so records can go through serde.
pub(crate) fn loro_value_to_json(
    value: &loro::LoroValue,
) -> std::result::Result<serde_json::Value, DocumentError> {
    match value {
        loro::LoroValue::Null => Ok(serde_json::Value::Null),
        loro::LoroValue::Bool(b) => Ok(serde_json::Value::Bool(*b)),
        loro::LoroValue::I64(n) => Ok(serde_json::json!(*n)),
        loro::LoroValue::Double(n) => Ok(serde_json::json!(*n)),
        loro::LoroValue::String(s) => Ok(serde_json::Value::String(s.to_string())),
        loro::LoroValue::List(arr) => {
            let items: Result<Vec<_>> = arr.iter().map(loro_value_to_json).collect();
            Ok(serde_json::Value::Array(items?))
        }
        loro::LoroValue::Map(map) => {
            let obj: Result<serde_json::Map<String, serde_json::Value>> = map
                .iter()
                .map(|(k, v)| Ok::<_, DocumentError>((k.clone(), loro_value_to_json(v)?)))
                .collect();
            Ok(serde_json::Value::Object(obj?))
        }
        _ => Err(DocumentError::Serialization(
            "container or binary value inside a record".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loro::LoroText;

    #[test]
    fn test_new_document_is_empty() {
        let doc = WorkspaceDoc::new();
        assert!(doc.nodes().is_empty());
        assert!(doc.children().is_empty());
        assert!(doc.file_contents().is_empty());
        assert!(doc.legacy_files().is_empty());
    }

    #[test]
    fn test_snapshot_roundtrip_keeps_containers() {
        let doc = WorkspaceDoc::new();
        let text = doc
            .legacy_files()
            .insert_container("a.txt", LoroText::new())
            .unwrap();
        text.insert(0, "hello").unwrap();
        doc.commit();

        let copy = WorkspaceDoc::from_bytes(&doc.export_snapshot().unwrap()).unwrap();
        assert_eq!(copy.legacy_files().len(), 1);
    }

    #[test]
    fn test_merge_from_pulls_missing_updates() {
        let a = WorkspaceDoc::with_peer_id(1).unwrap();
        let b = WorkspaceDoc::with_peer_id(2).unwrap();

        a.meta().insert("owner", "a").unwrap();
        a.commit();
        b.meta().insert("other", "b").unwrap();
        b.commit();

        b.merge_from(&a).unwrap();
        a.merge_from(&b).unwrap();

        assert_eq!(a.meta().len(), 2);
        assert_eq!(b.meta().len(), 2);
    }

    #[test]
    fn test_loro_value_to_json_map() {
        let doc = WorkspaceDoc::new();
        let record = doc
            .nodes()
            .insert_container("x", loro::LoroMap::new())
            .unwrap();
        record.insert("id", "x").unwrap();
        record.insert("n", 3i64).unwrap();
        record.insert("p", loro::LoroValue::Null).unwrap();
        doc.commit();

        let json = loro_value_to_json(&record.get_deep_value()).unwrap();
        assert_eq!(json["id"], "x");
        assert_eq!(json["n"], 3);
        assert!(json["p"].is_null());
    }
}
