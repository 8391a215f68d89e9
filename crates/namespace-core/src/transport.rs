//! PeerTransport trait for keeping replicas in sync.
//!
//! A transport joins a room through one or more signaling relays, opens
//! direct links to the other peers in that room, and exchanges document
//! updates over them. The namespace never talks to the network itself.
//!
//! Implementations:
//! - `OfflineTransport` - No peers; for single-user sessions and tests

use crate::document::WorkspaceDoc;
use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("No signaling endpoint configured")]
    NoSignaling,

    #[error("Transport already destroyed")]
    Destroyed,

    #[error("Transport error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Connection settings handed to [`PeerTransport::connect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomOptions {
    pub room: String,
    /// `ws://` or `wss://` relay URLs, tried in order.
    pub signaling: Vec<String>,
    /// Upper bound on simultaneous peer links.
    pub max_conns: usize,
}

/// Peer-to-peer synchronization provider for one workspace document.
#[async_trait]
pub trait PeerTransport: Send {
    /// Start syncing `doc` with every peer in the room.
    ///
    /// The transport may keep a clone of `doc` and import remote updates
    /// into it at any time until [`destroy`](Self::destroy) returns.
    async fn connect(&mut self, doc: &WorkspaceDoc, options: &RoomOptions) -> Result<()>;

    /// Close all peer links and stop touching the document.
    async fn destroy(&mut self) -> Result<()>;
}

/// Transport that never finds a peer.
#[derive(Debug, Default)]
pub struct OfflineTransport {
    room: Option<String>,
    destroyed: bool,
}

impl OfflineTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn room(&self) -> Option<&str> {
        self.room.as_deref()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }
}

#[async_trait]
impl PeerTransport for OfflineTransport {
    async fn connect(&mut self, _doc: &WorkspaceDoc, options: &RoomOptions) -> Result<()> {
        if self.destroyed {
            return Err(TransportError::Destroyed);
        }
        debug!("Offline transport joined room {}", options.room);
        self.room = Some(options.room.clone());
        Ok(())
    }

    async fn destroy(&mut self) -> Result<()> {
        self.room = None;
        self.destroyed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> RoomOptions {
        RoomOptions {
            room: "lan-room".into(),
            signaling: vec!["ws://127.0.0.1:4444".into()],
            max_conns: 20,
        }
    }

    #[tokio::test]
    async fn test_offline_transport_lifecycle() {
        let doc = WorkspaceDoc::new();
        let mut transport = OfflineTransport::new();

        transport.connect(&doc, &options()).await.unwrap();
        assert_eq!(transport.room(), Some("lan-room"));

        transport.destroy().await.unwrap();
        assert!(transport.is_destroyed());
        assert!(matches!(
            transport.connect(&doc, &options()).await,
            Err(TransportError::Destroyed)
        ));
    }
}
