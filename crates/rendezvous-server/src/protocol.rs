//! Wire format for the signaling stream.
//!
//! Every WebSocket text frame carries one JSON object:
//!
//! ```text
//! client -> server   {"event": "client-init", "args": ["<room>", "<sdp>"], "ack": 3}
//! server -> client   {"event": "client-init", "args": ["<sdp>"]}
//! server -> client   {"ack": 3, "args": ["<room>"]}
//! ```
//!
//! `args` are positional and default to `[]`. `ack` is present only when the
//! sender wants an acknowledgement; the server answers at most once per ack id.

use crate::errors::SignalingError;
use crate::types::RoomId;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const EVENT_SERVER_INIT: &str = "server-init";
pub const EVENT_CLIENT_INIT: &str = "client-init";
pub const EVENT_SERVER_ANSWER: &str = "server-answer";
pub const EVENT_ICE_CANDIDATE: &str = "ice-candidate";
pub const EVENT_CUSTOM_ERROR: &str = "custom-error";

/// Frame received from a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientFrame {
    pub event: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack: Option<u64>,
}

impl ClientFrame {
    /// Decode a text frame.
    pub fn decode(text: &str) -> Result<Self, SignalingError> {
        serde_json::from_str(text).map_err(|_| SignalingError::MalformedFrame)
    }

    /// Build a frame (used by clients and tests).
    #[must_use]
    pub fn new(event: &str, args: Vec<Value>, ack: Option<u64>) -> Self {
        Self {
            event: event.to_string(),
            args,
            ack,
        }
    }
}

/// Frame sent to a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerFrame {
    Event { event: String, args: Vec<Value> },
    Ack { ack: u64, args: Vec<Value> },
}

impl ServerFrame {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Event delivered by the service to a connection or a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundEvent {
    CustomError(String),
    ClientInit(String),
    ServerAnswer(String),
    IceCandidate(String),
}

impl OutboundEvent {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            OutboundEvent::CustomError(_) => EVENT_CUSTOM_ERROR,
            OutboundEvent::ClientInit(_) => EVENT_CLIENT_INIT,
            OutboundEvent::ServerAnswer(_) => EVENT_SERVER_ANSWER,
            OutboundEvent::IceCandidate(_) => EVENT_ICE_CANDIDATE,
        }
    }

    #[must_use]
    pub fn payload(&self) -> &str {
        match self {
            OutboundEvent::CustomError(s)
            | OutboundEvent::ClientInit(s)
            | OutboundEvent::ServerAnswer(s)
            | OutboundEvent::IceCandidate(s) => s,
        }
    }

    #[must_use]
    pub fn into_frame(self) -> ServerFrame {
        ServerFrame::Event {
            event: self.name().to_string(),
            args: vec![Value::String(self.payload().to_string())],
        }
    }
}

/// A validated inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    ServerInit,
    ClientInit {
        room_id: RoomId,
        description: String,
    },
    ServerAnswer {
        description: String,
    },
    IceCandidate {
        candidate: String,
    },
}

impl InboundEvent {
    /// Validate event name, argument count and argument types.
    pub fn parse(frame: &ClientFrame) -> Result<Self, SignalingError> {
        match frame.event.as_str() {
            EVENT_SERVER_INIT => Ok(InboundEvent::ServerInit),
            EVENT_CLIENT_INIT => {
                let (Some(room_id), Some(description)) = (frame.args.first(), frame.args.get(1))
                else {
                    return Err(SignalingError::InvalidArguments {
                        event: EVENT_CLIENT_INIT,
                    });
                };
                let room_id = room_id.as_str().ok_or(SignalingError::InvalidRoomId)?;
                let description =
                    description
                        .as_str()
                        .ok_or(SignalingError::InvalidDescription {
                            event: EVENT_CLIENT_INIT,
                        })?;
                Ok(InboundEvent::ClientInit {
                    room_id: RoomId::from(room_id),
                    description: description.to_string(),
                })
            }
            EVENT_SERVER_ANSWER => {
                let description = frame
                    .args
                    .first()
                    .ok_or(SignalingError::InvalidArguments {
                        event: EVENT_SERVER_ANSWER,
                    })?
                    .as_str()
                    .ok_or(SignalingError::InvalidDescription {
                        event: EVENT_SERVER_ANSWER,
                    })?;
                Ok(InboundEvent::ServerAnswer {
                    description: description.to_string(),
                })
            }
            EVENT_ICE_CANDIDATE => {
                let candidate = frame
                    .args
                    .first()
                    .ok_or(SignalingError::InvalidArguments {
                        event: EVENT_ICE_CANDIDATE,
                    })?
                    .as_str()
                    .ok_or(SignalingError::InvalidCandidate)?;
                Ok(InboundEvent::IceCandidate {
                    candidate: candidate.to_string(),
                })
            }
            other => Err(SignalingError::UnknownEvent(other.to_string())),
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            InboundEvent::ServerInit => EVENT_SERVER_INIT,
            InboundEvent::ClientInit { .. } => EVENT_CLIENT_INIT,
            InboundEvent::ServerAnswer { .. } => EVENT_SERVER_ANSWER,
            InboundEvent::IceCandidate { .. } => EVENT_ICE_CANDIDATE,
        }
    }
}
