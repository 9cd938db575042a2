//! # parley-protocol
//!
//! Wire protocol definitions for Parley call signaling.
//!
//! Two layers travel over the wire:
//!
//! - **Room frames** ([`Frame`]) - membership, presence and broadcasts
//!   between a room channel client and the relay server, MessagePack with
//!   a length prefix.
//! - **Signals** ([`Signal`]) - offer, answer, ICE candidate and leave
//!   messages exchanged by the two call participants, as JSON inside a
//!   broadcast payload.
//!
//! ## Example
//!
//! ```rust
//! use parley_protocol::{codec, Frame, SessionDescription, Signal};
//!
//! let offer = Signal::Offer(SessionDescription::offer("v=0"));
//! let frame = Frame::signal("video-room-1", &offer).unwrap();
//!
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod frames;
pub mod participant;
pub mod signal;
pub mod version;

pub use codec::{decode, encode, ProtocolError};
pub use frames::{codes, Frame, FrameType};
pub use participant::ParticipantId;
pub use signal::{
    IceCandidate, SdpType, SessionDescription, Signal, SignalError, SignalKind, SignalPayload,
};
pub use version::{Version, PROTOCOL_VERSION};
