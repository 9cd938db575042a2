//! Events fanned out to the members of a room.

use bytes::Bytes;
use parley_protocol::ParticipantId;

/// An event delivered to every subscriber of a room.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
    /// A member broadcast an event to the room.
    Broadcast {
        /// Sending member.
        source: ParticipantId,
        /// Event name.
        event: String,
        /// Opaque payload.
        payload: Bytes,
    },

    /// The presence roster changed. Carries the full roster, sorted by id.
    PresenceSync {
        /// Tracked members.
        members: Vec<ParticipantId>,
    },
}

impl RoomEvent {
    /// Whether this event was broadcast by `member`.
    ///
    /// Subscribers skip their own broadcasts.
    #[must_use]
    pub fn is_from(&self, member: &ParticipantId) -> bool {
        matches!(self, RoomEvent::Broadcast { source, .. } if source == member)
    }
}
