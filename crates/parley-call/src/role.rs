//! Presence-based role resolution.
//!
//! Both participants evaluate the same rule on their own copy of the
//! presence roster: sort the ids, the smallest becomes [`Role::Responder`],
//! the other [`Role::Initiator`]. The rule depends only on the ids, so the
//! two sides agree without exchanging anything.

use parley_protocol::ParticipantId;
use std::fmt;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

/// Role of a participant in a 1:1 call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Role {
    /// Creates and sends the offer.
    Initiator,
    /// Waits for the offer and answers it.
    Responder,
    /// Not enough participants yet.
    #[default]
    Unresolved,
}

impl Role {
    /// Whether a role has been assigned.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        !matches!(self, Role::Unresolved)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Initiator => write!(f, "initiator"),
            Role::Responder => write!(f, "responder"),
            Role::Unresolved => write!(f, "unresolved"),
        }
    }
}

/// Role resolution errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoleError {
    /// More than two participants are present in a 1:1 room.
    #[error("Room holds {count} participants, expected 2")]
    Ambiguous { count: usize },

    /// The roster has two entries but the local participant is not one.
    #[error("Local participant {0} is not in the roster")]
    NotAMember(ParticipantId),
}

/// Role of `local` when paired with `remote`.
///
/// The lexicographically smaller id responds; the larger initiates.
#[must_use]
pub fn role_for(local: &ParticipantId, remote: &ParticipantId) -> Role {
    if local < remote {
        Role::Responder
    } else {
        Role::Initiator
    }
}

/// Roles of `a` and `b`, in that order. The ids must differ.
#[must_use]
pub fn resolve_pair(a: &ParticipantId, b: &ParticipantId) -> (Role, Role) {
    debug_assert_ne!(a, b, "a participant cannot pair with itself");
    (role_for(a, b), role_for(b, a))
}

/// Assigns the local participant's role from presence updates.
///
/// Resolution is one-shot: once a role is assigned, later rosters are
/// ignored, so a stale or flapping presence report cannot flip it.
#[derive(Debug)]
pub struct RoleResolver {
    local_id: ParticipantId,
    role: Role,
}

impl RoleResolver {
    /// Create an unresolved resolver for the local participant.
    #[must_use]
    pub fn new(local_id: ParticipantId) -> Self {
        Self {
            local_id,
            role: Role::Unresolved,
        }
    }

    /// The local participant.
    #[must_use]
    pub fn local_id(&self) -> &ParticipantId {
        &self.local_id
    }

    /// The current role.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Feed a presence roster.
    ///
    /// Returns the role when this call assigns it, `Ok(None)` when there is
    /// nothing to do (too few participants, or already resolved).
    ///
    /// # Errors
    ///
    /// Returns [`RoleError::Ambiguous`] for more than two distinct
    /// participants and [`RoleError::NotAMember`] for a two-entry roster
    /// without the local participant. Neither assigns a role.
    pub fn on_presence_sync(
        &mut self,
        members: &[ParticipantId],
    ) -> Result<Option<Role>, RoleError> {
        if self.role.is_resolved() {
            trace!(participant = %self.local_id, role = %self.role, "Presence after resolution ignored");
            return Ok(None);
        }

        let mut roster: Vec<&ParticipantId> = members.iter().collect();
        roster.sort();
        roster.dedup();

        match roster.as_slice() {
            [] | [_] => {
                debug!(participant = %self.local_id, present = roster.len(), "Waiting for peer");
                Ok(None)
            }
            [first, second] => {
                let remote = if *first == &self.local_id {
                    second
                } else if *second == &self.local_id {
                    first
                } else {
                    warn!(participant = %self.local_id, "Roster does not include local participant");
                    return Err(RoleError::NotAMember(self.local_id.clone()));
                };

                self.role = role_for(&self.local_id, remote);
                info!(
                    participant = %self.local_id,
                    remote = %remote,
                    role = %self.role,
                    "Role resolved"
                );
                Ok(Some(self.role))
            }
            _ => {
                error!(
                    participant = %self.local_id,
                    present = roster.len(),
                    "Refusing role assignment, room is not 1:1"
                );
                Err(RoleError::Ambiguous {
                    count: roster.len(),
                })
            }
        }
    }
}
