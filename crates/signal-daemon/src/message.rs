//! Relay wire messages.
//!
//! Every frame is a JSON object with a string `type`. Only `subscribe` is
//! interpreted; everything else is opaque and forwarded as received.

use serde::{Deserialize, Serialize};

/// Frames larger than this (1 MiB) are dropped unread.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// What the relay needs to know about an inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// `{"type":"subscribe","room":"<id>"}`
    Subscribe { room: String },
    /// Any other typed message; `room` is set when the payload names one.
    Forward { room: Option<String> },
}

impl Inbound {
    /// Classify a raw frame.
    ///
    /// Returns None for anything malformed: not UTF-8, not a JSON object,
    /// no string `type`, or a `subscribe` without a non-empty room.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(data).ok()?;
        let value: serde_json::Value = serde_json::from_str(text).ok()?;
        let object = value.as_object()?;

        let msg_type = object.get("type")?.as_str()?;
        if msg_type.is_empty() {
            return None;
        }
        let room = object
            .get("room")
            .and_then(|r| r.as_str())
            .filter(|r| !r.is_empty())
            .map(String::from);

        if msg_type == "subscribe" {
            return room.map(|room| Inbound::Subscribe { room });
        }
        Some(Inbound::Forward { room })
    }
}

/// Control message carrying a room id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomMessage {
    /// "subscribe" or "subscribed"
    #[serde(rename = "type")]
    pub msg_type: String,

    pub room: String,
}

impl RoomMessage {
    /// Client request to join a room.
    pub fn subscribe(room: &str) -> Self {
        Self {
            msg_type: "subscribe".to_string(),
            room: room.to_string(),
        }
    }

    /// Server acknowledgement of a subscribe.
    pub fn subscribed(room: &str) -> Self {
        Self {
            msg_type: "subscribed".to_string(),
            room: room.to_string(),
        }
    }

    pub fn to_text(&self) -> String {
        serde_json::json!({ "type": self.msg_type, "room": self.room }).to_string()
    }

    /// Parse an acknowledgement; None for any other message.
    pub fn parse_subscribed(text: &str) -> Option<Self> {
        let msg: Self = serde_json::from_str(text).ok()?;
        (msg.msg_type == "subscribed").then_some(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_subscribe() {
        assert_eq!(
            Inbound::parse(br#"{"type":"subscribe","room":"x"}"#),
            Some(Inbound::Subscribe { room: "x".into() })
        );
    }

    #[test]
    fn test_subscribe_without_room_is_malformed() {
        assert_eq!(Inbound::parse(br#"{"type":"subscribe"}"#), None);
        assert_eq!(Inbound::parse(br#"{"type":"subscribe","room":""}"#), None);
        assert_eq!(Inbound::parse(br#"{"type":"subscribe","room":7}"#), None);
    }

    #[test]
    fn test_parse_forward() {
        assert_eq!(
            Inbound::parse(br#"{"type":"publish","data":{"a":1}}"#),
            Some(Inbound::Forward { room: None })
        );
        assert_eq!(
            Inbound::parse(br#"{"type":"publish","room":"y"}"#),
            Some(Inbound::Forward {
                room: Some("y".into())
            })
        );
    }

    #[test]
    fn test_malformed_input_returns_none() {
        assert_eq!(Inbound::parse(b"not json at all"), None);
        assert_eq!(Inbound::parse(br#"{"room":"x"}"#), None);
        assert_eq!(Inbound::parse(br#"{"type":3}"#), None);
        assert_eq!(Inbound::parse(br#"["subscribe"]"#), None);
        assert_eq!(Inbound::parse(&[0xff, 0xfe]), None);
    }

    #[test]
    fn test_subscribed_ack() {
        let text = RoomMessage::subscribed("lan-room").to_text();
        let parsed = RoomMessage::parse_subscribed(&text).unwrap();
        assert_eq!(parsed.room, "lan-room");

        assert!(RoomMessage::parse_subscribed(&RoomMessage::subscribe("x").to_text()).is_none());
    }
}
