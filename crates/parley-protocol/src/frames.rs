//! Frame types for the Parley room protocol.
//!
//! Frames carry room membership, presence and broadcasts between a room
//! channel client and the relay server. Each frame is serialized using
//! MessagePack.

use serde::{Deserialize, Serialize};

use crate::participant::ParticipantId;
use crate::signal::{Signal, SignalError};
use crate::version::Version;

/// Error codes carried by [`Frame::Error`].
pub mod codes {
    /// The frame could not be decoded or was not expected.
    pub const INVALID_FRAME: u16 = 1001;
    /// Joining the room was refused.
    pub const JOIN_FAILED: u16 = 1002;
    /// The connection has not joined the room.
    pub const NOT_JOINED: u16 = 1003;
    /// Presence tracking was refused.
    pub const TRACK_FAILED: u16 = 1004;
    /// The requested protocol major is not supported.
    pub const UNSUPPORTED_VERSION: u16 = 1005;
}

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum FrameType {
    Connect = 0x01,
    Connected = 0x02,
    Join = 0x03,
    Leave = 0x04,
    Track = 0x05,
    Broadcast = 0x06,
    Presence = 0x07,
    Ack = 0x08,
    Error = 0x09,
    Ping = 0x0A,
    Pong = 0x0B,
}

impl From<FrameType> for u8 {
    fn from(ft: FrameType) -> u8 {
        ft as u8
    }
}

impl TryFrom<u8> for FrameType {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, <Self as TryFrom<u8>>::Error> {
        match value {
            0x01 => Ok(FrameType::Connect),
            0x02 => Ok(FrameType::Connected),
            0x03 => Ok(FrameType::Join),
            0x04 => Ok(FrameType::Leave),
            0x05 => Ok(FrameType::Track),
            0x06 => Ok(FrameType::Broadcast),
            0x07 => Ok(FrameType::Presence),
            0x08 => Ok(FrameType::Ack),
            0x09 => Ok(FrameType::Error),
            0x0A => Ok(FrameType::Ping),
            0x0B => Ok(FrameType::Pong),
            _ => Err("Invalid frame type"),
        }
    }
}

/// A protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Client handshake.
    #[serde(rename = "connect")]
    Connect {
        /// Protocol version the client speaks.
        version: Version,
    },

    /// Handshake response.
    #[serde(rename = "connected")]
    Connected {
        /// Server-assigned connection identifier.
        connection_id: String,
        /// Negotiated protocol version.
        version: Version,
        /// Recommended heartbeat interval in milliseconds.
        heartbeat: u32,
    },

    /// Join a room topic as the given participant.
    #[serde(rename = "join")]
    Join {
        /// Request ID for acknowledgment.
        id: u64,
        /// Room topic.
        room: String,
        /// Presence key of the joining participant.
        member: ParticipantId,
    },

    /// Leave a room topic.
    #[serde(rename = "leave")]
    Leave {
        /// Request ID for acknowledgment.
        id: u64,
        /// Room topic.
        room: String,
    },

    /// Announce presence in a joined room.
    #[serde(rename = "track")]
    Track {
        /// Request ID for acknowledgment.
        id: u64,
        /// Room topic.
        room: String,
        /// Optional presence metadata.
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
    },

    /// Broadcast an event to the other members of a room.
    #[serde(rename = "broadcast")]
    Broadcast {
        /// Optional request ID for acknowledgment.
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        /// Room topic.
        room: String,
        /// Event name.
        event: String,
        /// Sending participant, filled in by the server.
        #[serde(skip_serializing_if = "Option::is_none")]
        source: Option<ParticipantId>,
        /// Event payload.
        #[serde(with = "serde_bytes")]
        payload: Vec<u8>,
    },

    /// Full presence roster of a room, sent on every change.
    #[serde(rename = "presence")]
    Presence {
        /// Room topic.
        room: String,
        /// Tracked members, sorted by identifier.
        members: Vec<ParticipantId>,
    },

    /// Acknowledgment of a request.
    #[serde(rename = "ack")]
    Ack {
        /// ID of the acknowledged request.
        id: u64,
    },

    /// Error response.
    #[serde(rename = "error")]
    Error {
        /// ID of the failed request (0 if not applicable).
        id: u64,
        /// Error code, see [`codes`].
        code: u16,
        /// Human-readable error message.
        message: String,
    },

    /// Keepalive ping.
    #[serde(rename = "ping")]
    Ping {
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Keepalive pong.
    #[serde(rename = "pong")]
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl Frame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Connect { .. } => FrameType::Connect,
            Frame::Connected { .. } => FrameType::Connected,
            Frame::Join { .. } => FrameType::Join,
            Frame::Leave { .. } => FrameType::Leave,
            Frame::Track { .. } => FrameType::Track,
            Frame::Broadcast { .. } => FrameType::Broadcast,
            Frame::Presence { .. } => FrameType::Presence,
            Frame::Ack { .. } => FrameType::Ack,
            Frame::Error { .. } => FrameType::Error,
            Frame::Ping { .. } => FrameType::Ping,
            Frame::Pong { .. } => FrameType::Pong,
        }
    }

    /// Create a Connect frame.
    #[must_use]
    pub fn connect(version: Version) -> Self {
        Frame::Connect { version }
    }

    /// Create a Connected frame.
    #[must_use]
    pub fn connected(connection_id: impl Into<String>, version: Version, heartbeat: u32) -> Self {
        Frame::Connected {
            connection_id: connection_id.into(),
            version,
            heartbeat,
        }
    }

    /// Create a Join frame.
    #[must_use]
    pub fn join(id: u64, room: impl Into<String>, member: ParticipantId) -> Self {
        Frame::Join {
            id,
            room: room.into(),
            member,
        }
    }

    /// Create a Leave frame.
    #[must_use]
    pub fn leave(id: u64, room: impl Into<String>) -> Self {
        Frame::Leave {
            id,
            room: room.into(),
        }
    }

    /// Create a Track frame.
    #[must_use]
    pub fn track(id: u64, room: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        Frame::Track {
            id,
            room: room.into(),
            data,
        }
    }

    /// Create a Broadcast frame carrying a call signal.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal cannot be serialized.
    pub fn signal(room: impl Into<String>, signal: &Signal) -> Result<Self, SignalError> {
        Ok(Frame::Broadcast {
            id: None,
            room: room.into(),
            event: signal.kind().as_str().to_string(),
            source: None,
            payload: signal.to_json()?,
        })
    }

    /// Create a Presence frame.
    #[must_use]
    pub fn presence(room: impl Into<String>, members: Vec<ParticipantId>) -> Self {
        Frame::Presence {
            room: room.into(),
            members,
        }
    }

    /// Create an Ack frame.
    #[must_use]
    pub fn ack(id: u64) -> Self {
        Frame::Ack { id }
    }

    /// Create an Error frame.
    #[must_use]
    pub fn error(id: u64, code: u16, message: impl Into<String>) -> Self {
        Frame::Error {
            id,
            code,
            message: message.into(),
        }
    }

    /// Create a Ping frame.
    #[must_use]
    pub fn ping(timestamp: Option<u64>) -> Self {
        Frame::Ping { timestamp }
    }

    /// Create a Pong frame.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        Frame::Pong { timestamp }
    }

    /// Request ID this frame expects an answer for, if any.
    #[must_use]
    pub fn request_id(&self) -> Option<u64> {
        match self {
            Frame::Join { id, .. } | Frame::Leave { id, .. } | Frame::Track { id, .. } => {
                Some(*id)
            }
            Frame::Broadcast { id, .. } => *id,
            _ => None,
        }
    }
}
