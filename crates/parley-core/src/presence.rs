//! Presence tracking for Parley rooms.
//!
//! The presence set is the live roster of participants that announced
//! themselves in a room. It is kept ordered by participant id: role
//! resolution sorts by id, never by join time, so the roster is published
//! in that order too.

use parley_protocol::ParticipantId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Presence state for a single participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceState {
    /// Participant ID.
    pub participant: ParticipantId,
    /// User-defined metadata.
    pub data: Option<serde_json::Value>,
    /// When the participant first tracked, in milliseconds since the epoch.
    pub joined_at: u64,
    /// Last track call.
    pub last_seen: u64,
}

impl PresenceState {
    /// Create a new presence state.
    #[must_use]
    pub fn new(participant: ParticipantId, data: Option<serde_json::Value>) -> Self {
        let now = now_millis();
        Self {
            participant,
            data,
            joined_at: now,
            last_seen: now,
        }
    }
}

/// Presence set for one room.
#[derive(Debug, Default)]
pub struct Presence {
    members: BTreeMap<ParticipantId, PresenceState>,
}

impl Presence {
    /// Create an empty presence set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of tracked participants.
    #[must_use]
    pub fn count(&self) -> usize {
        self.members.len()
    }

    /// Check if a participant is tracked.
    #[must_use]
    pub fn is_present(&self, participant: &ParticipantId) -> bool {
        self.members.contains_key(participant)
    }

    /// Get the presence state for a participant.
    #[must_use]
    pub fn get(&self, participant: &ParticipantId) -> Option<&PresenceState> {
        self.members.get(participant)
    }

    /// Track a participant.
    ///
    /// Tracking an already present participant refreshes its metadata and
    /// `last_seen` but keeps `joined_at`. Returns `true` if the participant
    /// is new.
    pub fn track(&mut self, participant: ParticipantId, data: Option<serde_json::Value>) -> bool {
        if let Some(state) = self.members.get_mut(&participant) {
            state.data = data;
            state.last_seen = now_millis();
            return false;
        }

        debug!(participant = %participant, "Presence: member tracked");
        self.members
            .insert(participant.clone(), PresenceState::new(participant, data));
        true
    }

    /// Stop tracking a participant.
    pub fn untrack(&mut self, participant: &ParticipantId) -> Option<PresenceState> {
        let state = self.members.remove(participant);
        if state.is_some() {
            debug!(participant = %participant, "Presence: member untracked");
        }
        state
    }

    /// Tracked participant ids, sorted.
    #[must_use]
    pub fn roster(&self) -> Vec<ParticipantId> {
        self.members.keys().cloned().collect()
    }

    /// Check if no one is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
