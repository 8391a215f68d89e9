//! Session: one peer's open workspace.
//!
//! Owns the namespace, the peer transport, the editor binding for the
//! selected file, and the local-only view state. Selection and collapsed
//! folders are persisted through a [`PreferenceStore`], never replicated.

use crate::config::WorkspaceConfig;
use crate::document::WorkspaceDoc;
use crate::namespace::{Namespace, NamespaceError, Watch};
use crate::node::NodeId;
use crate::prefs::{PreferenceStore, collapsed_folders_key, last_selected_key};
use crate::transport::{PeerTransport, TransportError};
use crate::view::{self, TreeRow, TreeViewState};
use loro::LoroText;
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Namespace error: {0}")]
    Namespace(#[from] NamespaceError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Binding failed: {0}")]
    Binding(String),
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// Attaches an editor to a file's collaborative text.
pub trait ContentBinder {
    type Binding: ContentBinding;

    fn bind(&mut self, file_id: &str, text: LoroText) -> Result<Self::Binding>;
}

/// A live editor attachment. Must stop touching the text once released.
pub trait ContentBinding {
    fn release(&mut self);
}

/// An open workspace for one peer.
pub struct Session<T: PeerTransport, B: ContentBinder, P: PreferenceStore> {
    config: WorkspaceConfig,
    namespace: Namespace,
    transport: T,
    binder: B,
    prefs: P,
    view: TreeViewState,
    binding: Option<B::Binding>,
    _watch: Watch,
}

impl<T: PeerTransport, B: ContentBinder, P: PreferenceStore> Session<T, B, P> {
    /// Open a workspace: bootstrap the tree, join the room, restore the
    /// last selection (or fall back to the first file).
    pub async fn open(
        config: WorkspaceConfig,
        doc: WorkspaceDoc,
        mut transport: T,
        binder: B,
        prefs: P,
    ) -> Result<Self> {
        let namespace = Namespace::new(doc);
        namespace.bootstrap(&config.initial_file_name)?;

        transport
            .connect(namespace.doc(), &config.room_options())
            .await?;
        let watch = namespace.watch();

        let view = TreeViewState {
            selected: None,
            collapsed: load_collapsed(&prefs, &config.room),
        };

        let mut session = Self {
            config,
            namespace,
            transport,
            binder,
            prefs,
            view,
            binding: None,
            _watch: watch,
        };

        let last = session.prefs.get(&last_selected_key(&session.config.room));
        let restored = match last {
            Some(id) => session.select_file(&id)?,
            None => false,
        };
        if !restored {
            session.select_first_file()?;
        }

        info!(
            "Opened workspace in room {} ({} nodes)",
            session.config.room,
            session.namespace.len()
        );
        Ok(session)
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn config(&self) -> &WorkspaceConfig {
        &self.config
    }

    pub fn view(&self) -> &TreeViewState {
        &self.view
    }

    pub fn selected(&self) -> Option<&str> {
        self.view.selected.as_deref()
    }

    /// Open a file in the editor. Returns false for folders and unknown ids.
    pub fn select_file(&mut self, id: &str) -> Result<bool> {
        match self.namespace.node(id) {
            Some(node) if node.is_file() => {}
            _ => return Ok(false),
        }
        let Some(text) = self.namespace.content(id) else {
            warn!("File {} has no content container", id);
            return Ok(false);
        };

        self.release_binding();
        self.binding = Some(self.binder.bind(id, text)?);
        self.view.selected = Some(id.to_string());

        let key = last_selected_key(&self.config.room);
        if let Err(e) = self.prefs.set(&key, id) {
            warn!("Failed to persist selection: {}", e);
        }
        debug!("Selected {}", id);
        Ok(true)
    }

    /// Create a file and open it.
    pub fn create_file(&mut self, parent_id: &str, name: &str) -> Result<Option<NodeId>> {
        let id = self.namespace.create_file(parent_id, name)?;
        if let Some(id) = &id {
            self.select_file(id)?;
        }
        Ok(id)
    }

    pub fn create_folder(&mut self, parent_id: &str, name: &str) -> Result<Option<NodeId>> {
        Ok(self.namespace.create_folder(parent_id, name)?)
    }

    pub fn rename(&mut self, id: &str, new_name: &str) -> Result<bool> {
        Ok(self.namespace.rename(id, new_name)?)
    }

    /// Delete a node; if that took the open file with it, open another.
    pub fn delete(&mut self, id: &str) -> Result<bool> {
        let deleted = self.namespace.delete(id)?;
        if deleted {
            self.reconcile_selection()?;
        }
        Ok(deleted)
    }

    /// Move a node. The open file keeps its binding target across the move.
    pub fn move_node(&mut self, id: &str, new_parent_id: &str) -> Result<bool> {
        let moved = self.namespace.move_node(id, new_parent_id)?;
        if moved && self.selected() == Some(id) {
            self.select_file(id)?;
        }
        Ok(moved)
    }

    /// Re-check the selection against the current tree.
    ///
    /// Call after remote changes: a peer may have deleted the open file.
    pub fn reconcile_selection(&mut self) -> Result<()> {
        let still_open = self
            .view
            .selected
            .as_deref()
            .and_then(|id| self.namespace.node(id))
            .is_some_and(|node| node.is_file());
        if !still_open {
            self.select_first_file()?;
        }
        Ok(())
    }

    /// Flip a folder's collapsed state and persist it. Root never collapses.
    pub fn toggle_collapsed(&mut self, folder_id: &str) -> bool {
        let collapsed = self.view.toggle(folder_id);
        let ids: Vec<&String> = self.view.collapsed.iter().collect();
        let key = collapsed_folders_key(&self.config.room);
        match serde_json::to_string(&ids) {
            Ok(json) => {
                if let Err(e) = self.prefs.set(&key, &json) {
                    warn!("Failed to persist collapsed folders: {}", e);
                }
            }
            Err(e) => warn!("Failed to encode collapsed folders: {}", e),
        }
        collapsed
    }

    /// Visible rows for the current view and search filter.
    pub fn tree_rows(&self, filter: &str) -> Vec<TreeRow> {
        view::project(&self.namespace, &self.view, filter)
    }

    /// Tear down: release the editor binding, then the transport, then the
    /// document, so no transport callback reaches a dropped document.
    pub async fn close(mut self) -> Result<()> {
        self.release_binding();
        self.transport.destroy().await?;
        drop(self._watch);
        drop(self.namespace);
        info!("Closed workspace in room {}", self.config.room);
        Ok(())
    }

    fn select_first_file(&mut self) -> Result<()> {
        match self.namespace.first_file() {
            Some(id) => {
                self.select_file(&id)?;
            }
            None => {
                self.release_binding();
                self.view.selected = None;
            }
        }
        Ok(())
    }

    fn release_binding(&mut self) {
        if let Some(mut binding) = self.binding.take() {
            binding.release();
        }
    }
}

fn load_collapsed<P: PreferenceStore>(prefs: &P, room: &str) -> BTreeSet<NodeId> {
    let Some(raw) = prefs.get(&collapsed_folders_key(room)) else {
        return BTreeSet::new();
    };
    match serde_json::from_str::<Vec<NodeId>>(&raw) {
        Ok(ids) => ids.into_iter().collect(),
        Err(e) => {
            warn!("Ignoring unreadable collapsed folder list: {}", e);
            BTreeSet::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::ROOT_ID;
    use crate::prefs::MemoryPreferences;
    use crate::transport::RoomOptions;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<String>>>;

    struct FakeTransport {
        log: Log,
    }

    #[async_trait]
    impl PeerTransport for FakeTransport {
        async fn connect(&mut self, _doc: &WorkspaceDoc, options: &RoomOptions) -> crate::transport::Result<()> {
            self.log.lock().unwrap().push(format!("connect:{}", options.room));
            Ok(())
        }

        async fn destroy(&mut self) -> crate::transport::Result<()> {
            self.log.lock().unwrap().push("destroy".into());
            Ok(())
        }
    }

    struct FakeBinder {
        log: Log,
    }

    struct FakeBinding {
        id: String,
        log: Log,
    }

    impl ContentBinder for FakeBinder {
        type Binding = FakeBinding;

        fn bind(&mut self, file_id: &str, _text: LoroText) -> Result<FakeBinding> {
            self.log.lock().unwrap().push(format!("bind:{}", file_id));
            Ok(FakeBinding {
                id: file_id.to_string(),
                log: Arc::clone(&self.log),
            })
        }
    }

    impl ContentBinding for FakeBinding {
        fn release(&mut self) {
            self.log.lock().unwrap().push(format!("release:{}", self.id));
        }
    }

    type TestSession = Session<FakeTransport, FakeBinder, Arc<MemoryPreferences>>;

    async fn open_with(doc: WorkspaceDoc, prefs: Arc<MemoryPreferences>) -> (TestSession, Log) {
        let log: Log = Arc::default();
        let session = Session::open(
            WorkspaceConfig::default(),
            doc,
            FakeTransport { log: Arc::clone(&log) },
            FakeBinder { log: Arc::clone(&log) },
            prefs,
        )
        .await
        .unwrap();
        (session, log)
    }

    async fn open() -> (TestSession, Log) {
        open_with(WorkspaceDoc::new(), Arc::new(MemoryPreferences::new())).await
    }

    #[tokio::test]
    async fn test_open_bootstraps_and_selects_initial_file() {
        let (session, log) = open().await;

        let id = session.selected().unwrap().to_string();
        assert_eq!(session.namespace().node(&id).unwrap().name, "Untitled.txt");
        assert_eq!(
            *log.lock().unwrap(),
            vec!["connect:lan-room".to_string(), format!("bind:{}", id)]
        );
    }

    #[tokio::test]
    async fn test_open_restores_last_selection() {
        let doc = WorkspaceDoc::new();
        let ns = Namespace::new(doc.clone());
        ns.bootstrap("Untitled.txt").unwrap();
        let notes = ns.create_file(ROOT_ID, "notes.txt").unwrap().unwrap();

        let prefs = Arc::new(MemoryPreferences::new());
        prefs.set("last-selected:lan-room", &notes).unwrap();

        let (session, _) = open_with(doc, prefs).await;
        assert_eq!(session.selected(), Some(notes.as_str()));
    }

    #[tokio::test]
    async fn test_stale_last_selection_falls_back_to_first_file() {
        let prefs = Arc::new(MemoryPreferences::new());
        prefs.set("last-selected:lan-room", "n_gone").unwrap();

        let (session, _) = open_with(WorkspaceDoc::new(), prefs).await;
        let first = session.namespace().first_file();
        assert_eq!(session.selected(), first.as_deref());
    }

    #[tokio::test]
    async fn test_select_file_persists_and_ignores_folders() {
        let prefs = Arc::new(MemoryPreferences::new());
        let (mut session, _) = open_with(WorkspaceDoc::new(), Arc::clone(&prefs)).await;
        let dir = session.create_folder(ROOT_ID, "dir").unwrap().unwrap();
        let previous = session.selected().map(String::from);

        assert!(!session.select_file(&dir).unwrap());
        assert_eq!(session.selected().map(String::from), previous);

        let f = session.create_file(&dir, "a.txt").unwrap().unwrap();
        assert_eq!(session.selected(), Some(f.as_str()));
        assert_eq!(prefs.get("last-selected:lan-room"), Some(f));
    }

    #[tokio::test]
    async fn test_deleting_open_file_selects_another() {
        let (mut session, _) = open().await;
        let initial = session.selected().unwrap().to_string();
        let other = session.create_file(ROOT_ID, "other.txt").unwrap().unwrap();
        assert_eq!(session.selected(), Some(other.as_str()));

        session.delete(&other).unwrap();
        assert_eq!(session.selected(), Some(initial.as_str()));

        session.delete(&initial).unwrap();
        assert_eq!(session.selected(), None);
    }

    #[tokio::test]
    async fn test_move_rebinds_open_file() {
        let (mut session, log) = open().await;
        let id = session.selected().unwrap().to_string();
        let dir = session.create_folder(ROOT_ID, "dir").unwrap().unwrap();
        log.lock().unwrap().clear();

        assert!(session.move_node(&id, &dir).unwrap());

        assert_eq!(session.selected(), Some(id.as_str()));
        assert_eq!(
            *log.lock().unwrap(),
            vec![format!("release:{}", id), format!("bind:{}", id)]
        );
    }

    #[tokio::test]
    async fn test_collapsed_folders_persist_across_sessions() {
        let prefs = Arc::new(MemoryPreferences::new());
        let doc = WorkspaceDoc::new();
        let (mut session, _) = open_with(doc.clone(), Arc::clone(&prefs)).await;
        let dir = session.create_folder(ROOT_ID, "dir").unwrap().unwrap();

        assert!(session.toggle_collapsed(&dir));
        assert!(!session.toggle_collapsed(ROOT_ID));
        session.close().await.unwrap();

        let (reopened, _) = open_with(doc, prefs).await;
        assert!(reopened.view().is_collapsed(&dir));
        let row = reopened
            .tree_rows("")
            .into_iter()
            .find(|r| r.id == dir)
            .unwrap();
        assert!(!row.expanded);
    }

    #[tokio::test]
    async fn test_remote_delete_is_reconciled() {
        let (mut session, _) = open().await;
        let open_id = session.selected().unwrap().to_string();

        let peer = Namespace::new(WorkspaceDoc::new());
        peer.doc().merge_from(session.namespace().doc()).unwrap();
        peer.delete(&open_id).unwrap();
        session.namespace().doc().merge_from(peer.doc()).unwrap();

        session.reconcile_selection().unwrap();
        assert_eq!(session.selected(), None);
    }

    #[tokio::test]
    async fn test_close_releases_binding_before_transport() {
        let (session, log) = open().await;
        let id = session.selected().unwrap().to_string();
        log.lock().unwrap().clear();

        session.close().await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![format!("release:{}", id), "destroy".to_string()]
        );
    }
}
