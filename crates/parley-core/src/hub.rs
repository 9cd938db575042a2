//! Room hub for Parley.
//!
//! The hub owns every live room and routes membership, presence and
//! broadcasts. It is shared behind an `Arc` by the relay server and by
//! in-process room channels.

use crate::event::RoomEvent;
use crate::room::{validate_topic, Room, RoomTopic};
use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use parley_protocol::ParticipantId;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

/// Hub errors.
#[derive(Debug, Error)]
pub enum HubError {
    /// Invalid room topic.
    #[error("Invalid room topic: {0}")]
    InvalidTopic(&'static str),

    /// Room not found.
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// Participant has not joined the room.
    #[error("Not joined to room: {0}")]
    NotJoined(String),

    /// Participant already joined the room.
    #[error("Already joined to room: {0}")]
    AlreadyJoined(String),

    /// Room member limit reached.
    #[error("Room is full: {0}")]
    RoomFull(String),

    /// Room limit reached.
    #[error("Maximum rooms reached")]
    MaxRoomsReached,
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Maximum number of live rooms.
    pub max_rooms: usize,
    /// Maximum members per room. Calls are 1:1, so the default is 2.
    pub max_members_per_room: usize,
    /// Per-room broadcast capacity.
    pub room_capacity: usize,
    /// Whether to delete rooms once their last member leaves.
    pub auto_delete_empty_rooms: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_rooms: 10_000,
            max_members_per_room: 2,
            room_capacity: 256,
            auto_delete_empty_rooms: true,
        }
    }
}

/// The room hub.
pub struct RoomHub {
    rooms: DashMap<RoomTopic, Room>,
    /// participant -> joined topics.
    memberships: DashMap<ParticipantId, DashSet<RoomTopic>>,
    config: HubConfig,
}

impl RoomHub {
    /// Create a hub with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HubConfig::default())
    }

    /// Create a hub with custom configuration.
    #[must_use]
    pub fn with_config(config: HubConfig) -> Self {
        info!("Creating room hub with config: {:?}", config);
        Self {
            rooms: DashMap::new(),
            memberships: DashMap::new(),
            config,
        }
    }

    /// Create a shared hub with custom configuration.
    #[must_use]
    pub fn shared(config: HubConfig) -> Arc<Self> {
        Arc::new(Self::with_config(config))
    }

    /// Get hub statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            room_count: self.rooms.len(),
            participant_count: self.memberships.len(),
            tracked_count: self.rooms.iter().map(|r| r.presence().count()).sum(),
        }
    }

    /// Join a room, creating it if needed.
    ///
    /// Returns a receiver for the room's events. The receiver also sees the
    /// member's own broadcasts; use [`RoomEvent::is_from`] to skip them.
    ///
    /// # Errors
    ///
    /// Returns an error if the topic is invalid, the participant already
    /// joined, or a room or member limit is reached.
    pub fn join(
        &self,
        topic: &str,
        participant: &ParticipantId,
    ) -> Result<broadcast::Receiver<Arc<RoomEvent>>, HubError> {
        validate_topic(topic).map_err(HubError::InvalidTopic)?;

        if self
            .memberships
            .get(participant)
            .is_some_and(|joined| joined.contains(topic))
        {
            return Err(HubError::AlreadyJoined(topic.to_string()));
        }

        if !self.rooms.contains_key(topic) && self.rooms.len() >= self.config.max_rooms {
            return Err(HubError::MaxRoomsReached);
        }

        let mut room = self.rooms.entry(topic.to_string()).or_insert_with(|| {
            debug!(room = %topic, "Creating new room");
            Room::with_capacity(topic, self.config.room_capacity)
        });

        if room.member_count() >= self.config.max_members_per_room {
            warn!(room = %topic, participant = %participant, "Join refused, room is full");
            return Err(HubError::RoomFull(topic.to_string()));
        }

        let receiver = room.subscribe(participant.clone());
        self.memberships
            .entry(participant.clone())
            .or_default()
            .insert(topic.to_string());

        debug!(
            room = %topic,
            participant = %participant,
            members = room.member_count(),
            "Joined"
        );

        Ok(receiver)
    }

    /// Leave a room.
    ///
    /// # Errors
    ///
    /// Returns an error if the participant has not joined the room.
    pub fn leave(&self, topic: &str, participant: &ParticipantId) -> Result<(), HubError> {
        let removed = self
            .memberships
            .get(participant)
            .and_then(|joined| joined.remove(topic));
        if removed.is_none() {
            return Err(HubError::NotJoined(topic.to_string()));
        }
        self.memberships
            .remove_if(participant, |_, joined| joined.is_empty());

        self.detach(topic, participant);
        Ok(())
    }

    fn detach(&self, topic: &str, participant: &ParticipantId) {
        let Some(mut room) = self.rooms.get_mut(topic) else {
            return;
        };
        room.unsubscribe(participant);

        debug!(
            room = %topic,
            participant = %participant,
            members = room.member_count(),
            "Left"
        );

        if self.config.auto_delete_empty_rooms && room.is_empty() {
            drop(room);
            self.rooms.remove(topic);
            debug!(room = %topic, "Deleted empty room");
        }
    }

    /// Announce a participant's presence in a joined room.
    ///
    /// Every call broadcasts the full roster. Returns `true` if the
    /// participant was not tracked before.
    ///
    /// # Errors
    ///
    /// Returns an error if the participant has not joined the room.
    pub fn track(
        &self,
        topic: &str,
        participant: &ParticipantId,
        data: Option<serde_json::Value>,
    ) -> Result<bool, HubError> {
        let mut room = self.joined_room(topic, participant)?;
        Ok(room.track(participant.clone(), data))
    }

    /// Broadcast an event to a room.
    ///
    /// Returns the number of other members that received it.
    ///
    /// # Errors
    ///
    /// Returns an error if the source has not joined the room.
    pub fn broadcast(
        &self,
        topic: &str,
        source: &ParticipantId,
        event: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Result<usize, HubError> {
        let room = self.joined_room(topic, source)?;
        let count = room
            .publish(source.clone(), event.into(), payload.into())
            .saturating_sub(1);
        trace!(room = %topic, recipients = count, "Broadcast");
        Ok(count)
    }

    fn joined_room(
        &self,
        topic: &str,
        participant: &ParticipantId,
    ) -> Result<dashmap::mapref::one::RefMut<'_, RoomTopic, Room>, HubError> {
        let room = self
            .rooms
            .get_mut(topic)
            .ok_or_else(|| HubError::RoomNotFound(topic.to_string()))?;
        if !room.is_member(participant) {
            return Err(HubError::NotJoined(topic.to_string()));
        }
        Ok(room)
    }

    /// Check if a room exists.
    #[must_use]
    pub fn room_exists(&self, topic: &str) -> bool {
        self.rooms.contains_key(topic)
    }

    /// Get the member count of a room.
    #[must_use]
    pub fn member_count(&self, topic: &str) -> usize {
        self.rooms
            .get(topic)
            .map(|r| r.member_count())
            .unwrap_or(0)
    }

    /// Tracked participants of a room, sorted by id.
    #[must_use]
    pub fn presence(&self, topic: &str) -> Vec<ParticipantId> {
        self.rooms
            .get(topic)
            .map(|r| r.presence().roster())
            .unwrap_or_default()
    }

}

impl Default for RoomHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Hub statistics.
#[derive(Debug, Clone)]
pub struct HubStats {
    /// Number of live rooms.
    pub room_count: usize,
    /// Number of participants with at least one membership.
    pub participant_count: usize,
    /// Number of tracked presences across all rooms.
    pub tracked_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ParticipantId {
        ParticipantId::from(s)
    }

    #[test]
    fn test_join_leave_deletes_empty_room() {
        let hub = RoomHub::new();

        let rx = hub.join("video-room-1", &id("alice")).unwrap();
        assert!(hub.room_exists("video-room-1"));
        assert_eq!(hub.member_count("video-room-1"), 1);
        drop(rx);

        hub.leave("video-room-1", &id("alice")).unwrap();
        assert!(!hub.room_exists("video-room-1"));
        assert!(matches!(
            hub.leave("video-room-1", &id("alice")),
            Err(HubError::NotJoined(_))
        ));
    }

    #[test]
    fn test_third_member_is_refused() {
        let hub = RoomHub::new();
        let _a = hub.join("video-r", &id("a")).unwrap();
        let _b = hub.join("video-r", &id("b")).unwrap();

        assert!(matches!(
            hub.join("video-r", &id("c")),
            Err(HubError::RoomFull(_))
        ));
        assert_eq!(hub.member_count("video-r"), 2);
        assert_eq!(hub.stats().participant_count, 2);
    }

    #[test]
    fn test_member_limit_is_configurable() {
        let hub = RoomHub::with_config(HubConfig {
            max_members_per_room: 3,
            ..Default::default()
        });
        let _a = hub.join("video-r", &id("a")).unwrap();
        let _b = hub.join("video-r", &id("b")).unwrap();
        assert!(hub.join("video-r", &id("c")).is_ok());
    }

    #[test]
    fn test_invalid_and_duplicate_join() {
        let hub = RoomHub::new();
        assert!(matches!(
            hub.join("", &id("a")),
            Err(HubError::InvalidTopic(_))
        ));

        let _rx = hub.join("video-r", &id("a")).unwrap();
        assert!(matches!(
            hub.join("video-r", &id("a")),
            Err(HubError::AlreadyJoined(_))
        ));
    }

    #[test]
    fn test_max_rooms() {
        let hub = RoomHub::with_config(HubConfig {
            max_rooms: 1,
            ..Default::default()
        });
        let _rx = hub.join("video-1", &id("a")).unwrap();
        assert!(matches!(
            hub.join("video-2", &id("b")),
            Err(HubError::MaxRoomsReached)
        ));
    }

    #[tokio::test]
    async fn test_track_and_leave_sync_presence() {
        let hub = RoomHub::new();
        let mut bob_rx = hub.join("video-r", &id("bob")).unwrap();
        let _alice_rx = hub.join("video-r", &id("alice")).unwrap();

        assert!(hub.track("video-r", &id("bob"), None).unwrap());
        assert!(hub.track("video-r", &id("alice"), None).unwrap());
        assert_eq!(hub.presence("video-r"), vec![id("alice"), id("bob")]);

        hub.leave("video-r", &id("alice")).unwrap();
        assert_eq!(hub.presence("video-r"), vec![id("bob")]);

        let mut rosters = Vec::new();
        while let Ok(event) = bob_rx.try_recv() {
            if let RoomEvent::PresenceSync { members } = &*event {
                rosters.push(members.clone());
            }
        }
        assert_eq!(
            rosters,
            vec![
                vec![id("bob")],
                vec![id("alice"), id("bob")],
                vec![id("bob")]
            ]
        );
    }

    #[test]
    fn test_track_requires_membership() {
        let hub = RoomHub::new();
        assert!(matches!(
            hub.track("video-r", &id("a"), None),
            Err(HubError::RoomNotFound(_))
        ));

        let _rx = hub.join("video-r", &id("a")).unwrap();
        assert!(matches!(
            hub.track("video-r", &id("b"), None),
            Err(HubError::NotJoined(_))
        ));
    }

    #[test]
    fn test_broadcast_reaches_other_member() {
        let hub = RoomHub::new();
        let mut alice_rx = hub.join("video-r", &id("alice")).unwrap();
        let mut bob_rx = hub.join("video-r", &id("bob")).unwrap();

        let count = hub
            .broadcast("video-r", &id("alice"), "offer", b"{}".to_vec())
            .unwrap();
        assert_eq!(count, 1);

        assert!(alice_rx.try_recv().unwrap().is_from(&id("alice")));
        match &*bob_rx.try_recv().unwrap() {
            RoomEvent::Broadcast { source, event, .. } => {
                assert_eq!(source, &id("alice"));
                assert_eq!(event, "offer");
            }
            other => panic!("Expected Broadcast, got {:?}", other),
        }
    }

    #[test]
    fn test_stats_follow_membership() {
        let hub = RoomHub::with_config(HubConfig {
            max_members_per_room: 4,
            ..Default::default()
        });
        let _r1 = hub.join("video-1", &id("a")).unwrap();
        let _r2 = hub.join("video-2", &id("a")).unwrap();
        hub.track("video-1", &id("a"), None).unwrap();

        let stats = hub.stats();
        assert_eq!(stats.room_count, 2);
        assert_eq!(stats.participant_count, 1);
        assert_eq!(stats.tracked_count, 1);

        hub.leave("video-1", &id("a")).unwrap();
        assert_eq!(hub.stats().participant_count, 1);
        assert_eq!(hub.stats().tracked_count, 0);

        hub.leave("video-2", &id("a")).unwrap();
        let stats = hub.stats();
        assert_eq!(stats.room_count, 0);
        assert_eq!(stats.participant_count, 0);
    }
}
