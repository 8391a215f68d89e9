//! Relay client used by peer transports to reach the signaling relay.

use crate::connection::{RelayError, Result};
use crate::message::RoomMessage;
use futures::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message,
};
use tracing::debug;

/// How long `subscribe` waits for the acknowledgement.
const ACK_TIMEOUT: Duration = Duration::from_secs(5);

pub struct RelayClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    /// Messages that arrived while waiting for an acknowledgement.
    pending: VecDeque<serde_json::Value>,
    room: Option<String>,
}

impl RelayClient {
    /// Open a WebSocket to `url` (`ws://host:port`).
    pub async fn connect(url: &str) -> Result<Self> {
        let (ws, _) = connect_async(url).await?;
        debug!("Connected to relay {}", url);
        Ok(Self {
            ws,
            pending: VecDeque::new(),
            room: None,
        })
    }

    /// Join a room and wait for the relay to confirm.
    ///
    /// Returns the room the relay reports, which differs from `room` if this
    /// connection was already bound elsewhere.
    pub async fn subscribe(&mut self, room: &str) -> Result<String> {
        self.send_text(RoomMessage::subscribe(room).to_text()).await?;

        let ack = timeout(ACK_TIMEOUT, async {
            loop {
                let text = self.next_text().await?;
                if let Some(ack) = RoomMessage::parse_subscribed(&text) {
                    return Ok::<_, RelayError>(ack.room);
                }
                if let Ok(value) = serde_json::from_str(&text) {
                    self.pending.push_back(value);
                }
            }
        })
        .await
        .map_err(|_| RelayError::Timeout)??;

        self.room = Some(ack.clone());
        Ok(ack)
    }

    pub fn room(&self) -> Option<&str> {
        self.room.as_deref()
    }

    /// Send a JSON message to the other members of the room.
    pub async fn publish(&mut self, message: &serde_json::Value) -> Result<()> {
        self.send_text(message.to_string()).await
    }

    /// Wait for the next JSON message. Non-JSON frames are skipped.
    pub async fn recv(&mut self) -> Result<serde_json::Value> {
        if let Some(value) = self.pending.pop_front() {
            return Ok(value);
        }
        loop {
            let text = self.next_text().await?;
            match serde_json::from_str(&text) {
                Ok(value) => return Ok(value),
                Err(e) => debug!("Skipping non-JSON frame: {}", e),
            }
        }
    }

    pub async fn recv_timeout(&mut self, duration: Duration) -> Result<serde_json::Value> {
        timeout(duration, self.recv())
            .await
            .map_err(|_| RelayError::Timeout)?
    }

    /// Close the connection gracefully.
    pub async fn close(mut self) -> Result<()> {
        self.ws.close(None).await?;
        Ok(())
    }

    async fn send_text(&mut self, text: String) -> Result<()> {
        self.ws.send(Message::text(text)).await?;
        Ok(())
    }

    async fn next_text(&mut self) -> Result<String> {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text.to_string()),
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => return Ok(text),
                    Err(_) => continue,
                },
                Some(Ok(Message::Close(_))) | None => return Err(RelayError::Disconnected),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }
}
