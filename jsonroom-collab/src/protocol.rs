//! JSON message envelope exchanged with the relay.
//!
//! Wire format (one JSON object per WebSocket text frame, tagged by `type`):
//! ```text
//! client → server                      server → client
//! ─────────────────────────────        ──────────────────────────────────────
//! {"type":"create_room"}               {"type":"hello","clientId":…}
//! {"type":"join","room":…}             {"type":"room_created","roomId":…}
//! {"type":"update_crdt",               {"type":"full_state_crdt","room":…,"update":b64}
//!  "room":…,"update":b64}              {"type":"remote_update_crdt","update":b64}
//!                                      {"type":"error","message":…}
//! ```
//!
//! `update` fields are yrs v1 updates in base64 (see `jsonroom_core::codec`).

use serde::{Deserialize, Deserializer, Serialize};

/// Room identifier, assigned by the relay or typed by the user.
pub type RoomId = String;

/// Opaque client identity assigned by the relay. Display only.
pub type ClientId = String;

/// Messages sent to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Ask the relay for a fresh room.
    CreateRoom,
    /// Enter a room; answered with `full_state_crdt`.
    Join { room: RoomId },
    /// Broadcast a local delta to the room.
    UpdateCrdt { room: RoomId, update: String },
}

/// Messages received from the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Hello {
        #[serde(rename = "clientId", deserialize_with = "string_or_number")]
        client_id: ClientId,
    },
    RoomCreated {
        #[serde(rename = "roomId", deserialize_with = "string_or_number")]
        room_id: RoomId,
    },
    /// Authoritative snapshot of a room, sent in reply to `join`.
    FullStateCrdt { room: RoomId, update: String },
    /// Another peer's delta. Relays that know the room may tag it.
    RemoteUpdateCrdt {
        update: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room: Option<RoomId>,
    },
    /// Non-fatal relay error.
    Error { message: String },
}

/// Identifiers may arrive as JSON strings or numbers.
fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
        Uint(u64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Int(n) => n.to_string(),
        Raw::Uint(n) => n.to_string(),
    })
}

impl ClientMessage {
    /// Serialize to a text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Parse a text frame (used by relays and tests).
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateRoom => "create_room",
            Self::Join { .. } => "join",
            Self::UpdateCrdt { .. } => "update_crdt",
        }
    }
}

impl ServerMessage {
    /// Serialize to a text frame (used by relays and tests).
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Parse a text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "hello",
            Self::RoomCreated { .. } => "room_created",
            Self::FullStateCrdt { .. } => "full_state_crdt",
            Self::RemoteUpdateCrdt { .. } => "remote_update_crdt",
            Self::Error { .. } => "error",
        }
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn as_json(text: &str) -> Value {
        serde_json::from_str(text).unwrap()
    }

    #[test]
    fn test_client_messages_wire_shape() {
        assert_eq!(
            as_json(&ClientMessage::CreateRoom.encode().unwrap()),
            json!({"type": "create_room"})
        );
        assert_eq!(
            as_json(&ClientMessage::Join { room: "r1".into() }.encode().unwrap()),
            json!({"type": "join", "room": "r1"})
        );
        assert_eq!(
            as_json(
                &ClientMessage::UpdateCrdt { room: "r1".into(), update: "AAE=".into() }
                    .encode()
                    .unwrap()
            ),
            json!({"type": "update_crdt", "room": "r1", "update": "AAE="})
        );
    }

    #[test]
    fn test_hello_with_string_id() {
        let msg = ServerMessage::decode(r#"{"type":"hello","clientId":"c-7"}"#).unwrap();
        assert_eq!(msg, ServerMessage::Hello { client_id: "c-7".into() });
    }

    #[test]
    fn test_hello_with_numeric_id() {
        let msg = ServerMessage::decode(r#"{"type":"hello","clientId":42}"#).unwrap();
        assert_eq!(msg, ServerMessage::Hello { client_id: "42".into() });
    }

    #[test]
    fn test_room_created() {
        let msg = ServerMessage::decode(r#"{"type":"room_created","roomId":"abc"}"#).unwrap();
        assert_eq!(msg, ServerMessage::RoomCreated { room_id: "abc".into() });
        assert_eq!(msg.kind(), "room_created");
    }

    #[test]
    fn test_full_state() {
        let msg =
            ServerMessage::decode(r#"{"type":"full_state_crdt","room":"abc","update":"AAA="}"#)
                .unwrap();
        assert_eq!(
            msg,
            ServerMessage::FullStateCrdt { room: "abc".into(), update: "AAA=".into() }
        );
    }

    #[test]
    fn test_remote_update_room_is_optional() {
        let untagged = ServerMessage::decode(r#"{"type":"remote_update_crdt","update":"AAA="}"#)
            .unwrap();
        assert_eq!(
            untagged,
            ServerMessage::RemoteUpdateCrdt { update: "AAA=".into(), room: None }
        );

        let tagged = ServerMessage::decode(
            r#"{"type":"remote_update_crdt","update":"AAA=","room":"r"}"#,
        )
        .unwrap();
        assert_eq!(
            tagged,
            ServerMessage::RemoteUpdateCrdt { update: "AAA=".into(), room: Some("r".into()) }
        );
        assert_eq!(
            as_json(&untagged.encode().unwrap()),
            json!({"type": "remote_update_crdt", "update": "AAA="})
        );
    }

    #[test]
    fn test_error_message() {
        let msg = ServerMessage::decode(r#"{"type":"error","message":"Room not found"}"#).unwrap();
        assert_eq!(msg, ServerMessage::Error { message: "Room not found".into() });
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(ServerMessage::decode(r#"{"type":"presence","x":1}"#).is_err());
    }

    #[test]
    fn test_not_json_rejected() {
        assert!(matches!(
            ServerMessage::decode("\u{0}garbage"),
            Err(ProtocolError::Deserialization(_))
        ));
    }

    #[test]
    fn test_missing_field_rejected() {
        assert!(ServerMessage::decode(r#"{"type":"full_state_crdt","room":"abc"}"#).is_err());
    }

    #[test]
    fn test_client_message_decode() {
        let msg = ClientMessage::decode(r#"{"type":"join","room":"x"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Join { room: "x".into() });
        assert_eq!(msg.kind(), "join");
    }
}
