//! Room abstraction for Parley.
//!
//! A room is a named broadcast topic with a member set and a presence set.
//! Members receive every event; presence is the subset that announced
//! itself.

use crate::event::RoomEvent;
use crate::presence::Presence;
use bytes::Bytes;
use parley_protocol::ParticipantId;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Maximum room topic length.
pub const MAX_TOPIC_LENGTH: usize = 256;

/// Default broadcast capacity.
const DEFAULT_ROOM_CAPACITY: usize = 256;

/// A room topic.
pub type RoomTopic = String;

/// Validate a room topic.
///
/// # Errors
///
/// Returns an error message if the topic is invalid.
pub fn validate_topic(topic: &str) -> Result<(), &'static str> {
    if topic.is_empty() {
        return Err("Room topic cannot be empty");
    }
    if topic.len() > MAX_TOPIC_LENGTH {
        return Err("Room topic too long");
    }
    if topic.starts_with('$') {
        return Err("Room topics starting with '$' are reserved");
    }
    if !topic.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err("Room topic contains invalid characters");
    }
    Ok(())
}

/// A room.
#[derive(Debug)]
pub struct Room {
    topic: RoomTopic,
    sender: broadcast::Sender<Arc<RoomEvent>>,
    members: HashSet<ParticipantId>,
    presence: Presence,
}

impl Room {
    /// Create a new room.
    #[must_use]
    pub fn new(topic: impl Into<RoomTopic>) -> Self {
        Self::with_capacity(topic, DEFAULT_ROOM_CAPACITY)
    }

    /// Create a new room with a specific broadcast capacity.
    #[must_use]
    pub fn with_capacity(topic: impl Into<RoomTopic>, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            topic: topic.into(),
            sender,
            members: HashSet::new(),
            presence: Presence::new(),
        }
    }

    /// Get the room topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Get the number of members.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Check if a participant is a member.
    #[must_use]
    pub fn is_member(&self, participant: &ParticipantId) -> bool {
        self.members.contains(participant)
    }

    /// Add a member, returning its event receiver.
    pub fn subscribe(&mut self, participant: ParticipantId) -> broadcast::Receiver<Arc<RoomEvent>> {
        debug!(room = %self.topic, participant = %participant, "Member subscribed");
        self.members.insert(participant);
        self.sender.subscribe()
    }

    /// Remove a member and its presence.
    ///
    /// Returns `true` if the participant was a member. A roster change is
    /// broadcast if the member was tracked.
    pub fn unsubscribe(&mut self, participant: &ParticipantId) -> bool {
        if !self.members.remove(participant) {
            return false;
        }
        debug!(room = %self.topic, participant = %participant, "Member unsubscribed");
        self.untrack(participant);
        true
    }

    /// Track a member's presence and broadcast the new roster.
    ///
    /// Returns `true` if the member was not tracked before.
    pub fn track(&mut self, participant: ParticipantId, data: Option<serde_json::Value>) -> bool {
        let is_new = self.presence.track(participant, data);
        self.sync_presence();
        is_new
    }

    /// Stop tracking a member. Broadcasts the new roster if it changed.
    fn untrack(&mut self, participant: &ParticipantId) -> bool {
        let removed = self.presence.untrack(participant).is_some();
        if removed {
            self.sync_presence();
        }
        removed
    }

    /// Broadcast an event from `source`.
    ///
    /// Returns the number of receivers, including the sender's own.
    pub fn publish(&self, source: ParticipantId, event: String, payload: Bytes) -> usize {
        trace!(room = %self.topic, source = %source, event = %event, "Broadcasting");
        self.send(RoomEvent::Broadcast {
            source,
            event,
            payload,
        })
    }

    /// The presence set.
    #[must_use]
    pub fn presence(&self) -> &Presence {
        &self.presence
    }

    /// Check if the room has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    fn sync_presence(&self) {
        let members = self.presence.roster();
        trace!(room = %self.topic, tracked = members.len(), "Presence sync");
        self.send(RoomEvent::PresenceSync { members });
    }

    fn send(&self, event: RoomEvent) -> usize {
        // No receivers is not an error: the room may be between members.
        self.sender.send(Arc::new(event)).unwrap_or_default()
    }
}
