//! Individual relay connection management.
//!
//! Each connection splits its WebSocket into a read task, which reports
//! frames to the server's event channel, and a write task, which drains a
//! bounded outbound queue. Enqueueing never waits on the network: a member
//! whose queue is full loses frames instead of stalling fan-out or growing
//! without limit.

use crate::message::MAX_MESSAGE_SIZE;
use crate::rooms::ConnId;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Error as WsError;
use tracing::{debug, warn};

/// Frames a member may have waiting before new ones are dropped.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Connection {0} is closed")]
    Closed(ConnId),

    #[error("Outbound queue of connection {0} is full")]
    QueueFull(ConnId),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timed out waiting for the relay")]
    Timeout,

    #[error("Relay closed the connection")]
    Disconnected,
}

pub type Result<T> = std::result::Result<T, RelayError>;

/// Event emitted by a connection's tasks.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// WebSocket upgrade finished; the server should register it.
    Opened(Connection),
    /// A frame from the client, already size-checked.
    Message { conn: ConnId, data: Vec<u8> },
    /// Connection was closed
    Closed { conn: ConnId },
}

/// A single client WebSocket connection.
#[derive(Debug)]
pub struct Connection {
    pub id: ConnId,
    pub addr: Option<SocketAddr>,
    outbound: mpsc::Sender<Message>,
    read_task: Option<JoinHandle<()>>,
}

impl Connection {
    /// Wrap an upgraded socket, spawning its read and write tasks, and
    /// hand the connection to the server as [`ConnectionEvent::Opened`].
    ///
    /// Reading starts only after `Opened` is queued, so the server always
    /// sees a connection before any of its frames.
    pub fn open(
        id: ConnId,
        addr: SocketAddr,
        socket: WebSocket,
        event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    ) {
        let (mut write, read) = socket.split();
        let (outbound, mut queue) = mpsc::channel::<Message>(OUTBOUND_QUEUE_CAPACITY);
        let (start_tx, start_rx) = oneshot::channel::<()>();

        let reader_tx = event_tx.clone();
        let read_task = tokio::spawn(async move {
            if start_rx.await.is_ok() {
                Self::read_loop(id, read, reader_tx).await;
            }
        });
        // Ends once every sender of the queue is dropped.
        tokio::spawn(async move {
            while let Some(msg) = queue.recv().await {
                if let Err(e) = write.send(msg).await {
                    debug!("Write to connection {} failed: {}", id, e);
                    break;
                }
            }
            let _ = write.close().await;
        });

        let conn = Self {
            id,
            addr: Some(addr),
            outbound,
            read_task: Some(read_task),
        };
        if event_tx.send(ConnectionEvent::Opened(conn)).is_ok() {
            let _ = start_tx.send(());
        }
    }

    /// A connection without a socket; frames queued to it land in the
    /// returned receiver.
    pub fn detached(id: ConnId) -> (Self, mpsc::Receiver<Message>) {
        let (outbound, queue) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let conn = Self {
            id,
            addr: None,
            outbound,
            read_task: None,
        };
        (conn, queue)
    }

    /// Read loop that forwards frames to the event channel.
    async fn read_loop(
        id: ConnId,
        mut read: SplitStream<WebSocket>,
        event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    ) {
        loop {
            match read.next().await {
                Some(Ok(msg)) => {
                    let data = match msg {
                        Message::Text(text) => text.as_str().as_bytes().to_vec(),
                        Message::Binary(data) => data.to_vec(),
                        Message::Ping(_) | Message::Pong(_) => continue,
                        Message::Close(_) => {
                            debug!("Received close frame from {}", id);
                            break;
                        }
                    };

                    if data.len() > MAX_MESSAGE_SIZE {
                        warn!(
                            "Message from {} exceeds max size ({} > {}), dropping",
                            id,
                            data.len(),
                            MAX_MESSAGE_SIZE
                        );
                        continue;
                    }

                    if event_tx.send(ConnectionEvent::Message { conn: id, data }).is_err() {
                        // Server is gone.
                        return;
                    }
                }
                Some(Err(e)) => {
                    debug!("WebSocket error on {}: {}", id, e);
                    break;
                }
                None => {
                    debug!("Connection {} stream ended", id);
                    break;
                }
            }
        }

        let _ = event_tx.send(ConnectionEvent::Closed { conn: id });
    }

    /// Queue a text frame without waiting.
    ///
    /// Fails if the writer has stopped or the member is too far behind.
    pub fn send_text(&self, text: String) -> Result<()> {
        self.outbound
            .try_send(Message::Text(text.into()))
            .map_err(|e| match e {
                TrySendError::Full(_) => RelayError::QueueFull(self.id),
                TrySendError::Closed(_) => RelayError::Closed(self.id),
            })
    }

    /// Ask the writer to send a close frame and stop reading.
    pub fn close(&mut self) {
        let _ = self.outbound.try_send(Message::Close(None));
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detached_connection_queues_frames() {
        let (conn, mut queue) = Connection::detached(4);
        conn.send_text("hi".into()).unwrap();

        match queue.try_recv().unwrap() {
            Message::Text(text) => assert_eq!(text.as_str(), "hi"),
            other => panic!("Expected text frame, got {:?}", other),
        }
    }

    #[test]
    fn test_send_after_receiver_dropped_fails() {
        let (conn, queue) = Connection::detached(5);
        drop(queue);

        assert!(matches!(conn.send_text("x".into()), Err(RelayError::Closed(5))));
    }

    #[test]
    fn test_full_queue_drops_instead_of_growing() {
        let (conn, mut queue) = Connection::detached(6);
        for i in 0..OUTBOUND_QUEUE_CAPACITY {
            conn.send_text(i.to_string()).unwrap();
        }

        assert!(matches!(conn.send_text("late".into()), Err(RelayError::QueueFull(6))));

        // Draining one slot makes room again.
        queue.try_recv().unwrap();
        conn.send_text("next".into()).unwrap();
    }
}
