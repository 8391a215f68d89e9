//! Room membership table.
//!
//! Owned by exactly one `RelayServer`; nothing else mutates it. A connection
//! is bound to at most one room for its whole lifetime.

use std::collections::{BTreeSet, HashMap};

/// Server-assigned connection id.
pub type ConnId = u64;

/// Result of a subscribe request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subscription {
    /// Connection joined `room`; `created` if the room did not exist yet.
    Bound { room: String, created: bool },
    /// Connection was already a member of this room; nothing changed.
    AlreadyBound { room: String },
    /// Connection is bound elsewhere; the request was ignored.
    Ignored { bound: String },
}

impl Subscription {
    /// Room to put in the acknowledgement: the one the connection is in.
    pub fn ack_room(&self) -> &str {
        match self {
            Subscription::Bound { room, .. } | Subscription::AlreadyBound { room } => room,
            Subscription::Ignored { bound } => bound,
        }
    }
}

#[derive(Debug, Default)]
pub struct RoomTable {
    rooms: HashMap<String, BTreeSet<ConnId>>,
    bindings: HashMap<ConnId, String>,
}

impl RoomTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `conn` to `room`, creating the room on first use.
    pub fn subscribe(&mut self, conn: ConnId, room: &str) -> Subscription {
        if let Some(bound) = self.bindings.get(&conn) {
            return if bound == room {
                Subscription::AlreadyBound {
                    room: bound.clone(),
                }
            } else {
                Subscription::Ignored {
                    bound: bound.clone(),
                }
            };
        }

        let created = !self.rooms.contains_key(room);
        self.rooms.entry(room.to_string()).or_default().insert(conn);
        self.bindings.insert(conn, room.to_string());
        Subscription::Bound {
            room: room.to_string(),
            created,
        }
    }

    /// Who should receive a forwarded message from `conn`.
    ///
    /// A bound connection always targets its own room. An unbound one may
    /// name a room explicitly. The sender is never included.
    pub fn recipients(&self, conn: ConnId, explicit_room: Option<&str>) -> Vec<ConnId> {
        let room = match self.bindings.get(&conn) {
            Some(bound) => bound.as_str(),
            None => match explicit_room {
                Some(room) => room,
                None => return Vec::new(),
            },
        };
        self.rooms
            .get(room)
            .map(|members| members.iter().copied().filter(|m| *m != conn).collect())
            .unwrap_or_default()
    }

    /// Remove `conn` from its room, deleting the room if it is now empty.
    ///
    /// Returns the room the connection was bound to.
    pub fn disconnect(&mut self, conn: ConnId) -> Option<String> {
        let room = self.bindings.remove(&conn)?;
        if let Some(members) = self.rooms.get_mut(&room) {
            members.remove(&conn);
            if members.is_empty() {
                self.rooms.remove(&room);
            }
        }
        Some(room)
    }

    pub fn room_of(&self, conn: ConnId) -> Option<&str> {
        self.bindings.get(&conn).map(String::as_str)
    }

    pub fn member_count(&self, room: &str) -> usize {
        self.rooms.get(room).map_or(0, BTreeSet::len)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
