//! Wire schema of the dictator protocol.
//!
//! Every datagram is a self-describing JSON document:
//!
//! ```text
//! Envelope            { Kind: int32, SenderID: string, Blob: bytes }
//! CommandBlob         { Name: string, Value: any }
//! CommandResponseBlob { ResponderID: string, Status: int32, Result: any }
//! ```
//!
//! Field names are part of the protocol and must not change.
//!
//! # Addressing of command responses
//!
//! A `CommandResponse` envelope reuses `SenderID` to carry the *addressee*,
//! i.e. the node that issued the original command. The identity of the node
//! that actually answered travels inside the blob as `ResponderID`. Receivers
//! match `SenderID` against their own identity to decide whether a response
//! is theirs. This is a protocol contract, not a naming accident.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{DictatorError, Result};
use crate::transport::Packet;

/// Identity of a node, generated once per process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Generates a fresh random identity (hex, 32 chars).
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Envelope kind. Any other value on the wire marks foreign traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum Kind {
    Heartbeat = 1,
    Command = 2,
    CommandResponse = 3,
}

impl Kind {
    /// Whether a raw wire value denotes a protocol message.
    pub fn is_valid(raw: i32) -> bool {
        Kind::try_from(raw).is_ok()
    }
}

impl TryFrom<i32> for Kind {
    type Error = DictatorError;

    fn try_from(raw: i32) -> Result<Self> {
        match raw {
            1 => Ok(Kind::Heartbeat),
            2 => Ok(Kind::Command),
            3 => Ok(Kind::CommandResponse),
            other => Err(DictatorError::UnknownKind(other)),
        }
    }
}

impl From<Kind> for i32 {
    fn from(kind: Kind) -> Self {
        kind as i32
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::Heartbeat => write!(f, "heartbeat"),
            Kind::Command => write!(f, "command"),
            Kind::CommandResponse => write!(f, "command-response"),
        }
    }
}

/// The outer message carried by every datagram.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "Kind")]
    pub kind: Kind,
    /// Sender for heartbeats and commands; addressee for command responses.
    #[serde(rename = "SenderID")]
    pub sender_id: NodeId,
    #[serde(rename = "Blob", default)]
    pub blob: Vec<u8>,
}

impl Envelope {
    pub fn heartbeat(sender_id: NodeId) -> Self {
        Self {
            kind: Kind::Heartbeat,
            sender_id,
            blob: Vec::new(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(DictatorError::Encode)
    }

    /// Decodes a datagram. Unknown kinds fail like any other malformed input.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(DictatorError::Decode)
    }

    pub fn command_blob(&self) -> Result<CommandBlob> {
        serde_json::from_slice(&self.blob).map_err(DictatorError::Decode)
    }

    pub fn response_blob(&self) -> Result<CommandResponseBlob> {
        serde_json::from_slice(&self.blob).map_err(DictatorError::Decode)
    }

    pub fn into_packet(self) -> Result<Packet> {
        Ok(Packet::new(self.encode()?))
    }
}

/// Whether the bytes hold a well-formed envelope of a known kind.
pub fn is_protocol_message(bytes: &[u8]) -> bool {
    Envelope::decode(bytes).is_ok()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandBlob {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value", default)]
    pub value: serde_json::Value,
}

impl CommandBlob {
    pub fn value_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.value.clone()).map_err(DictatorError::Decode)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponseBlob {
    #[serde(rename = "ResponderID")]
    pub responder_id: NodeId,
    #[serde(rename = "Status")]
    pub status: i32,
    #[serde(rename = "Result", default)]
    pub result: serde_json::Value,
}

impl CommandResponseBlob {
    pub fn result_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.result.clone()).map_err(DictatorError::Decode)
    }
}

/// Builds a sendable `Command` packet issued by `sender_id`.
pub fn new_command_packet<V: Serialize>(sender_id: &NodeId, name: &str, value: V) -> Result<Packet> {
    let blob = CommandBlob {
        name: name.to_string(),
        value: serde_json::to_value(value).map_err(DictatorError::Encode)?,
    };

    Envelope {
        kind: Kind::Command,
        sender_id: sender_id.clone(),
        blob: serde_json::to_vec(&blob).map_err(DictatorError::Encode)?,
    }
    .into_packet()
}

/// Builds a sendable `CommandResponse` packet.
///
/// The envelope's `SenderID` is set to `addressee_id` (the commander), the
/// responder's own identity goes into the blob. See the module docs.
pub fn new_command_response_packet<R: Serialize>(
    addressee_id: &NodeId,
    responder_id: &NodeId,
    status: i32,
    result: R,
) -> Result<Packet> {
    let blob = CommandResponseBlob {
        responder_id: responder_id.clone(),
        status,
        result: serde_json::to_value(result).map_err(DictatorError::Encode)?,
    };

    Envelope {
        kind: Kind::CommandResponse,
        sender_id: addressee_id.clone(),
        blob: serde_json::to_vec(&blob).map_err(DictatorError::Encode)?,
    }
    .into_packet()
}
