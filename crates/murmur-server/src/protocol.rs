//! Wire protocol: connection identifiers and the closed sets of inbound and
//! outbound events.
//!
//! Every frame is a JSON object `{"event": <name>, "data": <payload>}`; `data`
//! is absent for events that carry no payload.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Opaque, transport-assigned connection identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Allocate a fresh identifier.
    pub fn new() -> Self {
        Self(format!("conn_{}", Uuid::now_v7()))
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for ConnectionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ConnectionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Events a connection can raise.
///
/// `Disconnect` is raised by the transport when the socket goes away; it is
/// never accepted off the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum InboundEvent {
    /// Claim (or re-claim) a display name.
    #[serde(rename = "set username")]
    SetUsername(String),
    /// The user started typing.
    #[serde(rename = "typing")]
    Typing,
    /// The user stopped typing.
    #[serde(rename = "stop typing")]
    StopTyping,
    /// A chat line.
    #[serde(rename = "chat message")]
    ChatMessage(String),
    /// The connection closed.
    #[serde(skip)]
    Disconnect,
}

impl InboundEvent {
    /// Wire name of the event, used as a log and metrics label.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetUsername(_) => "set username",
            Self::Typing => "typing",
            Self::StopTyping => "stop typing",
            Self::ChatMessage(_) => "chat message",
            Self::Disconnect => "disconnect",
        }
    }
}

/// Payload of an outbound `chat message`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPayload {
    /// Sender's registered display name.
    pub user: String,
    /// Message text, verbatim.
    pub msg: String,
}

/// Events the relay delivers to connections.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum OutboundEvent {
    /// Server-authored notice.
    #[serde(rename = "system message")]
    SystemMessage(String),
    /// Display names of every identified connection, in join order.
    #[serde(rename = "user list")]
    UserList(Vec<String>),
    /// Another user started typing.
    #[serde(rename = "user typing")]
    UserTyping(String),
    /// Another user stopped typing.
    #[serde(rename = "user stopped typing")]
    UserStoppedTyping(String),
    /// A chat line from an identified user.
    #[serde(rename = "chat message")]
    ChatMessage(ChatPayload),
}

impl OutboundEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SystemMessage(_) => "system message",
            Self::UserList(_) => "user list",
            Self::UserTyping(_) => "user typing",
            Self::UserStoppedTyping(_) => "user stopped typing",
            Self::ChatMessage(_) => "chat message",
        }
    }
}

/// A frame that could not be decoded into an [`InboundEvent`].
#[derive(Debug, Error)]
#[error("malformed frame: {0}")]
pub struct ProtocolError(#[from] serde_json::Error);

/// Decode a text frame into an inbound event.
pub fn decode_inbound(text: &str) -> Result<InboundEvent, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

/// Encode an outbound event as a text frame.
pub fn encode_outbound(event: &OutboundEvent) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(event)?)
}
