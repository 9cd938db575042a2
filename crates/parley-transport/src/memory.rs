//! In-process room channel over a shared [`RoomHub`].

use async_trait::async_trait;
use parley_core::{RoomEvent, RoomHub};
use parley_protocol::{ParticipantId, Signal};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::traits::{ChannelEvent, RoomChannel, TransportError};

/// A room channel bound directly to a hub.
///
/// Dropping a subscribed channel leaves the room.
pub struct MemoryRoomChannel {
    hub: Arc<RoomHub>,
    topic: String,
    local_id: ParticipantId,
    receiver: Option<broadcast::Receiver<Arc<RoomEvent>>>,
}

impl MemoryRoomChannel {
    /// Create an unsubscribed channel.
    #[must_use]
    pub fn new(hub: Arc<RoomHub>, topic: impl Into<String>, local_id: ParticipantId) -> Self {
        Self {
            hub,
            topic: topic.into(),
            local_id,
            receiver: None,
        }
    }

    fn require_subscribed(&self) -> Result<(), TransportError> {
        if self.receiver.is_none() {
            return Err(TransportError::NotSubscribed(self.topic.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl RoomChannel for MemoryRoomChannel {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn local_id(&self) -> &ParticipantId {
        &self.local_id
    }

    fn is_subscribed(&self) -> bool {
        self.receiver.is_some()
    }

    async fn subscribe(&mut self) -> Result<(), TransportError> {
        if self.receiver.is_some() {
            return Ok(());
        }
        let receiver = self
            .hub
            .join(&self.topic, &self.local_id)
            .map_err(|e| TransportError::SubscribeFailed(e.to_string()))?;
        self.receiver = Some(receiver);
        debug!(room = %self.topic, participant = %self.local_id, "Memory channel subscribed");
        Ok(())
    }

    async fn track(&mut self, data: Option<serde_json::Value>) -> Result<(), TransportError> {
        self.require_subscribed()?;
        self.hub.track(&self.topic, &self.local_id, data)?;
        Ok(())
    }

    async fn send(&mut self, signal: &Signal) -> Result<(), TransportError> {
        self.require_subscribed()?;
        let payload = signal.to_json()?;
        self.hub
            .broadcast(&self.topic, &self.local_id, signal.kind().as_str(), payload)
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        Ok(())
    }

    async fn next_event(&mut self) -> Option<ChannelEvent> {
        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    if event.is_from(&self.local_id) {
                        continue;
                    }
                    let converted = match &*event {
                        RoomEvent::PresenceSync { members } => {
                            Some(ChannelEvent::Presence(members.clone()))
                        }
                        RoomEvent::Broadcast { event, payload, .. } => {
                            ChannelEvent::from_broadcast(event, payload)
                        }
                    };
                    if let Some(converted) = converted {
                        return Some(converted);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(room = %self.topic, skipped, "Memory channel lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    fn presence_state(&self) -> Vec<ParticipantId> {
        self.hub.presence(&self.topic)
    }

    async fn unsubscribe(&mut self) -> Result<(), TransportError> {
        if self.receiver.take().is_none() {
            return Ok(());
        }
        self.hub.leave(&self.topic, &self.local_id)?;
        debug!(room = %self.topic, participant = %self.local_id, "Memory channel unsubscribed");
        Ok(())
    }
}

impl Drop for MemoryRoomChannel {
    fn drop(&mut self) {
        if self.receiver.take().is_some() {
            let _ = self.hub.leave(&self.topic, &self.local_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_protocol::{IceCandidate, SessionDescription};

    fn pair(hub: &Arc<RoomHub>) -> (MemoryRoomChannel, MemoryRoomChannel) {
        (
            MemoryRoomChannel::new(hub.clone(), "video-room-1", "alice".into()),
            MemoryRoomChannel::new(hub.clone(), "video-room-1", "bob".into()),
        )
    }

    #[tokio::test]
    async fn test_presence_and_signal_flow() {
        let hub = Arc::new(RoomHub::new());
        let (mut alice, mut bob) = pair(&hub);

        alice.subscribe().await.unwrap();
        bob.subscribe().await.unwrap();
        alice.track(None).await.unwrap();

        match bob.next_event().await {
            Some(ChannelEvent::Presence(members)) => assert_eq!(members, vec![ParticipantId::from("alice")]),
            other => panic!("Expected presence, got {:?}", other),
        }

        let offer = Signal::Offer(SessionDescription::offer("v=0"));
        alice.send(&offer).await.unwrap();
        match bob.next_event().await {
            Some(ChannelEvent::Signal(Ok(signal))) => assert_eq!(signal, offer),
            other => panic!("Expected offer, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_own_broadcasts_are_skipped() {
        let hub = Arc::new(RoomHub::new());
        let (mut alice, mut bob) = pair(&hub);
        alice.subscribe().await.unwrap();
        bob.subscribe().await.unwrap();

        alice
            .send(&Signal::IceCandidate(IceCandidate::new("candidate:0")))
            .await
            .unwrap();
        bob.track(None).await.unwrap();

        // Alice never sees her own candidate, only Bob's presence.
        match alice.next_event().await {
            Some(ChannelEvent::Presence(members)) => assert_eq!(members, vec![ParticipantId::from("bob")]),
            other => panic!("Expected presence, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_send_requires_subscription() {
        let hub = Arc::new(RoomHub::new());
        let (mut alice, _) = pair(&hub);
        assert!(matches!(
            alice.send(&Signal::Leave).await,
            Err(TransportError::NotSubscribed(_))
        ));
        assert!(alice.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_full_room_fails_subscribe() {
        let hub = Arc::new(RoomHub::new());
        let (mut alice, mut bob) = pair(&hub);
        let mut carol = MemoryRoomChannel::new(hub.clone(), "video-room-1", "carol".into());

        alice.subscribe().await.unwrap();
        bob.subscribe().await.unwrap();
        assert!(matches!(
            carol.subscribe().await,
            Err(TransportError::SubscribeFailed(_))
        ));
        assert!(!carol.is_subscribed());
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent_and_drop_leaves() {
        let hub = Arc::new(RoomHub::new());
        let (mut alice, mut bob) = pair(&hub);
        alice.subscribe().await.unwrap();
        bob.subscribe().await.unwrap();

        alice.unsubscribe().await.unwrap();
        alice.unsubscribe().await.unwrap();
        assert_eq!(hub.member_count("video-room-1"), 1);

        drop(bob);
        assert!(!hub.room_exists("video-room-1"));
    }
}
