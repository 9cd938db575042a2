//! Local participant identity.

use async_trait::async_trait;
use parley_protocol::ParticipantId;

/// Source of the local participant id used as the presence key.
///
/// Lookup may suspend, e.g. on an auth service round trip.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// The local participant's id.
    async fn participant_id(&self) -> ParticipantId;
}

/// An identity generated once (UUID v4) and reused for the whole session.
#[derive(Debug, Clone)]
pub struct GeneratedIdentity {
    id: ParticipantId,
}

impl GeneratedIdentity {
    /// Generate a fresh identity.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: ParticipantId::generate(),
        }
    }
}

impl Default for GeneratedIdentity {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityProvider for GeneratedIdentity {
    async fn participant_id(&self) -> ParticipantId {
        self.id.clone()
    }
}

/// A fixed, externally assigned identity.
#[derive(Debug, Clone)]
pub struct FixedIdentity(pub ParticipantId);

#[async_trait]
impl IdentityProvider for FixedIdentity {
    async fn participant_id(&self) -> ParticipantId {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_generated_identity_is_stable() {
        let identity = GeneratedIdentity::new();
        let first = identity.participant_id().await;
        assert_eq!(first, identity.participant_id().await);
        assert_ne!(first, GeneratedIdentity::new().participant_id().await);
    }

    #[tokio::test]
    async fn test_fixed_identity() {
        let identity = FixedIdentity("alice".into());
        assert_eq!(identity.participant_id().await.as_str(), "alice");
    }
}
