//! signal-daemon library: room-scoped WebSocket relay for peer signaling.
//!
//! The binary is a thin wrapper; integration tests drive `RelayServer`
//! directly and talk to it through `RelayClient`.

pub mod client;
pub mod connection;
pub mod message;
pub mod rooms;
pub mod server;

// Re-export key types for convenience
pub use client::RelayClient;
pub use connection::{Connection, ConnectionEvent, RelayError};
pub use message::{Inbound, MAX_MESSAGE_SIZE, RoomMessage};
pub use rooms::{ConnId, RoomTable, Subscription};
pub use server::{HttpListener, RelayServer};
