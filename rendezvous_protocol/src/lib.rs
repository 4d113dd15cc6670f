#![forbid(unsafe_code)]
//! Messages exchanged between browser peers and the rendezvous signaling server.
//!
//! Every frame is a JSON object carrying a `type` discriminator. Inbound frames are
//! [`PeerRequest`]s, outbound frames are [`PeerEvent`]s. Relayed `signal` frames are
//! forwarded verbatim and never re-encoded, so their payload fields have no type here.

use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{fmt, str::FromStr};

/// Identifier the server hands out to a connection once the websocket is up.
#[derive(
    Debug, Display, Default, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, From,
)]
#[serde(transparent)]
pub struct PeerId(pub String);

impl PeerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Application supplied name of a room.
#[derive(
    Debug, Display, Default, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, From,
)]
#[serde(transparent)]
pub struct RoomId(pub String);

impl RoomId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Shape rule shared by peer and room identifiers: longer than 2 and shorter than 100 bytes.
pub fn is_valid_id(id: &str) -> bool {
    id.len() > 2 && id.len() < 100
}

/// Requests go from peer to signaling server
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PeerRequest {
    /// Join a room, creating it if needed.
    Join { room: RoomId },
    /// Routing header of a signal frame. Any other fields of the frame are opaque.
    Signal {
        #[serde(rename = "senderPeerId")]
        sender: PeerId,
        #[serde(rename = "receiverPeerId")]
        receiver: PeerId,
    },
    /// Keeps the connection from being swept.
    Ping,
}

/// Reasons an inbound frame could not be turned into a [`PeerRequest`].
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame is not a json object")]
    NotAnObject,
    #[error("field `{0}` is not a string")]
    FieldType(&'static str),
    #[error("unknown message type {0}")]
    UnknownType(String),
}

/// Looks a key up: an exact match wins,
/// otherwise the first key equal to `name` ignoring ASCII case.
fn field<'a>(object: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    object.get(name).or_else(|| {
        object
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    })
}

/// A string field; absent and `null` both read as empty.
fn string_field(object: &Map<String, Value>, name: &'static str) -> Result<String, DecodeError> {
    match field(object, name) {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(value)) => Ok(value.clone()),
        Some(_) => Err(DecodeError::FieldType(name)),
    }
}

impl PeerRequest {
    /// Decodes a frame by reading its `type` first, then the fields of that variant only.
    ///
    /// Keys match without regard to case. Absent or `null` fields decode as empty
    /// identifiers so that they fail validation downstream rather than failing to parse,
    /// and a bare `null` frame reads as an object with no fields.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let object = match serde_json::from_str::<Value>(text)? {
            Value::Object(object) => object,
            Value::Null => Map::new(),
            _ => return Err(DecodeError::NotAnObject),
        };

        let kind = string_field(&object, "type")?;
        match kind.as_str() {
            "join" => Ok(PeerRequest::Join {
                room: string_field(&object, "room")?.into(),
            }),
            "signal" => Ok(PeerRequest::Signal {
                sender: string_field(&object, "senderPeerId")?.into(),
                receiver: string_field(&object, "receiverPeerId")?.into(),
            }),
            "ping" => Ok(PeerRequest::Ping),
            _ => Err(DecodeError::UnknownType(kind)),
        }
    }
}

impl FromStr for PeerRequest {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

impl fmt::Display for PeerRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", serde_json::to_string(self).map_err(|_| fmt::Error)?)
    }
}

/// Events go from signaling server to peer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PeerEvent {
    /// Sent once, right after the upgrade, before any other event.
    /// Includes the PeerId the receiver should consider to be theirs.
    Init {
        #[serde(rename = "yourPeerId")]
        your_peer_id: PeerId,
    },
    /// Full member list of a room, sent to every member whenever someone joins it.
    Joined {
        #[serde(rename = "otherPeerIds")]
        other_peer_ids: Vec<PeerId>,
    },
}

impl fmt::Display for PeerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", serde_json::to_string(self).map_err(|_| fmt::Error)?)
    }
}

impl FromStr for PeerEvent {
    type Err = serde_json::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(s)
    }
}
