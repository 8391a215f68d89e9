//! Room relay server.
//!
//! One task owns the room table and the connection registry. Connection
//! tasks report through a single channel, so every table mutation happens
//! inside `handle_event`, one event at a time. HTTP is served by an axum
//! router on the same port: WebSocket upgrades become connections, any
//! other request gets a liveness reply.

use crate::connection::{Connection, ConnectionEvent};
use crate::message::{Inbound, RoomMessage};
use crate::rooms::{ConnId, RoomTable, Subscription};
use anyhow::Result;
use axum::{
    Router,
    extract::{
        ConnectInfo, State,
        ws::{WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Body of the reply to plain HTTP requests.
pub const LIVENESS_BODY: &str = "Signaling relay running";

/// How long shutdown waits for the HTTP listener to drain.
const HTTP_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct RelayServer {
    rooms: RoomTable,
    connections: HashMap<ConnId, Connection>,
    next_conn_id: Arc<AtomicU64>,
    event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    event_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
}

/// Handler state: where upgraded sockets are reported.
#[derive(Clone)]
struct Acceptor {
    next_conn_id: Arc<AtomicU64>,
    event_tx: mpsc::UnboundedSender<ConnectionEvent>,
}

/// A running HTTP listener. Dropping it stops accepting.
pub struct HttpListener {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<std::io::Result<()>>,
}

impl HttpListener {
    /// Stop accepting and wait for in-flight HTTP requests.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        match tokio::time::timeout(HTTP_DRAIN_TIMEOUT, &mut self.task).await {
            Ok(joined) => joined??,
            Err(_) => {
                warn!("HTTP listener did not drain in time");
                self.task.abort();
            }
        }
        Ok(())
    }
}

impl Default for RelayServer {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayServer {
    pub fn new() -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            rooms: RoomTable::new(),
            connections: HashMap::new(),
            next_conn_id: Arc::new(AtomicU64::new(1)),
            event_tx,
            event_rx,
        }
    }

    /// Bind to an address and return the TCP listener.
    pub async fn bind(listen_addr: &str) -> Result<TcpListener> {
        let listener = TcpListener::bind(listen_addr).await?;
        info!("Signaling relay listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Routes for the relay port. Every path and method lands on
    /// [`relay_endpoint`].
    fn router(&self) -> Router {
        Router::new().fallback(relay_endpoint).with_state(Acceptor {
            next_conn_id: Arc::clone(&self.next_conn_id),
            event_tx: self.event_tx.clone(),
        })
    }

    /// Serve HTTP on `listener` in a background task.
    ///
    /// Upgraded sockets arrive as [`ConnectionEvent::Opened`]; a slow
    /// handshake never blocks the relay loop.
    pub fn listen(&self, listener: TcpListener) -> HttpListener {
        let (stop, stopped) = oneshot::channel::<()>();
        let app = self.router();
        let serve = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = stopped.await;
        })
        .into_future();
        HttpListener {
            stop: Some(stop),
            task: tokio::spawn(serve),
        }
    }

    /// Wait for the next connection event.
    pub async fn next_event(&mut self) -> Option<ConnectionEvent> {
        self.event_rx.recv().await
    }

    /// Apply one connection event to the room table.
    pub fn handle_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Opened(conn) => self.register(conn),
            ConnectionEvent::Message { conn, data } => self.on_message(conn, data),
            ConnectionEvent::Closed { conn } => self.on_closed(conn),
        }
    }

    /// Add an upgraded connection to the registry.
    pub fn register(&mut self, conn: Connection) {
        match conn.addr {
            Some(addr) => info!("New connection from {} (conn: {})", addr, conn.id),
            None => debug!("Registered connection {}", conn.id),
        }
        self.next_conn_id.fetch_max(conn.id + 1, Ordering::Relaxed);
        self.connections.insert(conn.id, conn);
    }

    fn on_message(&mut self, conn: ConnId, data: Vec<u8>) {
        let Some(inbound) = Inbound::parse(&data) else {
            debug!("Dropping malformed message from {} ({} bytes)", conn, data.len());
            return;
        };

        match inbound {
            Inbound::Subscribe { room } => {
                let outcome = self.rooms.subscribe(conn, &room);
                match &outcome {
                    Subscription::Bound { room, created } => {
                        if *created {
                            debug!("Created room {}", room);
                        }
                        info!("Connection {} joined room {}", conn, room);
                    }
                    Subscription::AlreadyBound { room } => {
                        debug!("Connection {} re-subscribed to {}", conn, room);
                    }
                    Subscription::Ignored { bound } => {
                        debug!(
                            "Connection {} asked for {} but is bound to {}",
                            conn, room, bound
                        );
                    }
                }
                let ack = RoomMessage::subscribed(outcome.ack_room()).to_text();
                self.deliver(conn, ack);
            }
            Inbound::Forward { room } => {
                let recipients = self.rooms.recipients(conn, room.as_deref());
                if recipients.is_empty() {
                    return;
                }
                // Valid UTF-8: `Inbound::parse` accepted it.
                let text = String::from_utf8_lossy(&data).into_owned();
                for recipient in &recipients {
                    self.deliver(*recipient, text.clone());
                }
                debug!("Forwarded {} bytes from {} to {} member(s)", data.len(), conn, recipients.len());
            }
        }
    }

    /// Queue a frame for one connection. Failures stay with that recipient.
    fn deliver(&self, conn: ConnId, text: String) {
        match self.connections.get(&conn) {
            Some(target) => {
                if let Err(e) = target.send_text(text) {
                    warn!("Failed to deliver to {}: {}", conn, e);
                }
            }
            None => warn!("Failed to deliver to {}: not connected", conn),
        }
    }

    fn on_closed(&mut self, conn: ConnId) {
        self.connections.remove(&conn);
        match self.rooms.disconnect(conn) {
            Some(room) => {
                let left = self.rooms.member_count(&room);
                info!("Connection {} left room {} ({} remaining)", conn, room, left);
                if left == 0 {
                    debug!("Deleted empty room {}", room);
                }
            }
            None => debug!("Unbound connection {} closed", conn),
        }
    }

    /// Serve `listener` and relay until `shutdown` resolves.
    pub async fn run(
        mut self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()>,
    ) -> Result<()> {
        let http = self.listen(listener);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                Some(event) = self.event_rx.recv() => {
                    self.handle_event(event);
                }

                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        for conn in self.connections.values_mut() {
            conn.close();
        }
        info!("Relay stopped ({} connection(s) closed)", self.connections.len());
        http.shutdown().await
    }

    pub fn member_count(&self, room: &str) -> usize {
        self.rooms.member_count(room)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.room_count()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

/// Upgrade WebSocket requests; answer anything else with a liveness body.
async fn relay_endpoint(
    State(acceptor): State<Acceptor>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    upgrade: std::result::Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Ok(upgrade) = upgrade else {
        debug!("Plain HTTP request from {}", addr);
        return LIVENESS_BODY.into_response();
    };

    let id = acceptor.next_conn_id.fetch_add(1, Ordering::Relaxed);
    upgrade
        .on_failed_upgrade(move |e| debug!("WebSocket upgrade failed for {}: {}", addr, e))
        .on_upgrade(move |socket| async move {
            Connection::open(id, addr, socket, acceptor.event_tx);
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::OUTBOUND_QUEUE_CAPACITY;
    use axum::extract::ws::Message;
    use tokio::sync::mpsc::Receiver;

    fn add(server: &mut RelayServer, id: ConnId) -> Receiver<Message> {
        let (conn, queue) = Connection::detached(id);
        server.handle_event(ConnectionEvent::Opened(conn));
        queue
    }

    fn send(server: &mut RelayServer, conn: ConnId, text: &str) {
        server.handle_event(ConnectionEvent::Message {
            conn,
            data: text.as_bytes().to_vec(),
        });
    }

    fn drain(queue: &mut Receiver<Message>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(msg) = queue.try_recv() {
            if let Message::Text(text) = msg {
                out.push(text.as_str().to_string());
            }
        }
        out
    }

    fn subscribe(server: &mut RelayServer, conn: ConnId, room: &str) {
        send(server, conn, &RoomMessage::subscribe(room).to_text());
    }

    #[test]
    fn test_subscribe_is_acknowledged() {
        let mut server = RelayServer::new();
        let mut q1 = add(&mut server, 1);

        subscribe(&mut server, 1, "x");

        let acks = drain(&mut q1);
        assert_eq!(acks.len(), 1);
        assert_eq!(RoomMessage::parse_subscribed(&acks[0]).unwrap().room, "x");
        assert_eq!(server.member_count("x"), 1);
    }

    #[test]
    fn test_forward_reaches_room_peers_only() {
        let mut server = RelayServer::new();
        let mut q1 = add(&mut server, 1);
        let mut q2 = add(&mut server, 2);
        let mut q3 = add(&mut server, 3);
        subscribe(&mut server, 1, "x");
        subscribe(&mut server, 2, "x");
        subscribe(&mut server, 3, "y");
        drain(&mut q1);
        drain(&mut q2);
        drain(&mut q3);

        let payload = r#"{"type":"publish","topic":"x","data":{"n":1}}"#;
        send(&mut server, 1, payload);

        assert_eq!(drain(&mut q2), vec![payload]);
        assert!(drain(&mut q1).is_empty());
        assert!(drain(&mut q3).is_empty());
    }

    #[test]
    fn test_last_member_leaving_deletes_room() {
        let mut server = RelayServer::new();
        let mut q1 = add(&mut server, 1);
        let _q2 = add(&mut server, 2);
        subscribe(&mut server, 2, "x");

        server.handle_event(ConnectionEvent::Closed { conn: 2 });
        send(&mut server, 1, r#"{"type":"publish","room":"x"}"#);

        assert_eq!(server.member_count("x"), 0);
        assert_eq!(server.room_count(), 0);
        assert_eq!(server.connection_count(), 1);
        assert!(drain(&mut q1).is_empty());
    }

    #[test]
    fn test_failed_recipient_does_not_block_others() {
        let mut server = RelayServer::new();
        let _q1 = add(&mut server, 1);
        let q2 = add(&mut server, 2);
        let mut q3 = add(&mut server, 3);
        for conn in 1..=3 {
            subscribe(&mut server, conn, "x");
        }
        drop(q2);

        send(&mut server, 1, r#"{"type":"signal"}"#);

        assert_eq!(drain(&mut q3).last().map(String::as_str), Some(r#"{"type":"signal"}"#));
    }

    #[test]
    fn test_malformed_input_gets_no_response() {
        let mut server = RelayServer::new();
        let mut q1 = add(&mut server, 1);
        let mut q2 = add(&mut server, 2);
        subscribe(&mut server, 2, "x");
        drain(&mut q2);

        send(&mut server, 1, "garbage");
        send(&mut server, 1, r#"{"room":"x"}"#);
        send(&mut server, 1, r#"{"type":"subscribe"}"#);

        assert!(drain(&mut q1).is_empty());
        assert!(drain(&mut q2).is_empty());
        assert_eq!(server.room_count(), 1);
    }

    #[test]
    fn test_resubscribe_to_other_room_acks_bound_room() {
        let mut server = RelayServer::new();
        let mut q1 = add(&mut server, 1);
        subscribe(&mut server, 1, "x");
        subscribe(&mut server, 1, "y");

        let acks = drain(&mut q1);
        assert_eq!(acks.len(), 2);
        assert!(
            acks.iter()
                .all(|a| RoomMessage::parse_subscribed(a).is_some_and(|m| m.room == "x"))
        );
        assert_eq!(server.member_count("x"), 1);
        assert_eq!(server.member_count("y"), 0);
    }

    #[test]
    fn test_stalled_member_does_not_block_others() {
        let mut server = RelayServer::new();
        let _q1 = add(&mut server, 1);
        let mut stalled = add(&mut server, 2);
        let mut q3 = add(&mut server, 3);
        for conn in 1..=3 {
            subscribe(&mut server, conn, "x");
        }
        drain(&mut q3);

        // Member 2 never reads; its queue fills and later frames are dropped.
        let mut delivered = 0;
        for i in 0..OUTBOUND_QUEUE_CAPACITY + 10 {
            send(&mut server, 1, &format!(r#"{{"type":"signal","n":{}}}"#, i));
            delivered += drain(&mut q3).len();
        }

        assert_eq!(delivered, OUTBOUND_QUEUE_CAPACITY + 10);
        // Its subscribe ack plus as many frames as still fit.
        assert_eq!(drain(&mut stalled).len(), OUTBOUND_QUEUE_CAPACITY);
        assert_eq!(server.member_count("x"), 3);
    }

    #[test]
    fn test_registered_ids_advance_the_allocator() {
        let mut server = RelayServer::new();
        let _q = add(&mut server, 7);
        assert_eq!(server.next_conn_id.load(Ordering::Relaxed), 8);
    }
}
