//! namespace-core: a shared folder/file tree on top of a Loro document.
//!
//! This crate provides:
//! - The workspace document and its named containers
//! - The namespace manager (create, rename, delete, move, legacy migration)
//! - Change events and a read-time tree projection
//! - A session that ties the tree to a peer transport, an editor binding,
//!   and local-only preferences

pub mod config;
pub mod document;
pub mod events;
pub mod namespace;
pub mod node;
pub mod prefs;
pub mod session;
pub mod transport;
pub mod view;

pub use config::{ConfigError, WorkspaceConfig, signaling_endpoints};
pub use document::{DocumentError, WorkspaceDoc};
pub use events::{EventBus, Listener, NamespaceEvent};
pub use namespace::{Namespace, NamespaceError, Violation, Watch};
pub use node::{ContentRef, Node, NodeId, NodeKind, NodeType, ROOT_ID, ROOT_NAME};
pub use prefs::{MemoryPreferences, PreferenceError, PreferenceStore};
pub use session::{ContentBinder, ContentBinding, Session, SessionError};
pub use transport::{OfflineTransport, PeerTransport, RoomOptions, TransportError};
pub use view::{TreeRow, TreeViewState};
