//! Call session.
//!
//! A [`CallSession`] owns one participant's room channel, role resolver and
//! signaling relay, and drives them from a single task until the call ends.
//! The paired [`SessionHandle`] requests the local leave; dropping the
//! handle requests it too.
//!
//! Ending a call goes through the handle. Aborting the task that runs
//! [`CallSession::run`], or dropping that future, stops the session where
//! it stands: no `leave` reaches the peer and [`PeerConnection::close`] is
//! never called. The room channel is dropped with the session, so an
//! in-process channel still leaves its room.

use parley_core::RoomHub;
use parley_protocol::{IceCandidate, ParticipantId, Signal};
use parley_transport::{
    ChannelEvent, MemoryRoomChannel, RoomChannel, WebSocketConfig, WebSocketRoomChannel,
};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::config::CallConfig;
use crate::connection::PeerConnection;
use crate::error::CallError;
use crate::identity::IdentityProvider;
use crate::relay::{CallObserver, CallState, NoopObserver, SignalingRelay};
use crate::role::{Role, RoleResolver};

/// How a call session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    /// The peer sent `leave`.
    RemoteLeft,
    /// The local side left through its handle.
    LocalLeft,
    /// The room channel closed underneath the session.
    ChannelClosed,
}

/// Requests the local leave of a running session.
///
/// Leaving or dropping the handle lets the session send `leave`, close the
/// peer connection and unsubscribe before [`CallSession::run`] returns. Keep
/// the run future alive until then; cancelling it skips all three.
#[derive(Debug)]
pub struct SessionHandle {
    leave_tx: Option<oneshot::Sender<()>>,
}

impl SessionHandle {
    /// Leave the call. Same as dropping the handle.
    pub fn leave(mut self) {
        if let Some(tx) = self.leave_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Whether the session has already finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.leave_tx.as_ref().map_or(true, |tx| tx.is_closed())
    }
}

/// One participant's side of a 1:1 call.
pub struct CallSession<Ch, C, O = NoopObserver> {
    channel: Ch,
    resolver: RoleResolver,
    relay: SignalingRelay<C, O>,
    local_candidates: Option<mpsc::UnboundedReceiver<IceCandidate>>,
    leave_rx: oneshot::Receiver<()>,
    presence_data: Option<serde_json::Value>,
}

impl<Ch, C, O> CallSession<Ch, C, O>
where
    Ch: RoomChannel,
    C: PeerConnection,
    O: CallObserver,
{
    /// Create a session over an unsubscribed channel.
    pub fn new(channel: Ch, mut connection: C, observer: O) -> (Self, SessionHandle) {
        let (leave_tx, leave_rx) = oneshot::channel();
        let local_candidates = connection.take_local_candidates();
        let session = Self {
            resolver: RoleResolver::new(channel.local_id().clone()),
            channel,
            relay: SignalingRelay::with_observer(connection, observer),
            local_candidates,
            leave_rx,
            presence_data: None,
        };
        let handle = SessionHandle {
            leave_tx: Some(leave_tx),
        };
        (session, handle)
    }

    /// Set the payload announced with presence.
    #[must_use]
    pub fn with_presence_data(mut self, data: serde_json::Value) -> Self {
        self.presence_data = Some(data);
        self
    }

    /// Local participant.
    #[must_use]
    pub fn local_id(&self) -> &ParticipantId {
        self.resolver.local_id()
    }

    /// Resolved role.
    #[must_use]
    pub fn role(&self) -> Role {
        self.resolver.role()
    }

    /// Relay state.
    #[must_use]
    pub fn state(&self) -> CallState {
        self.relay.state()
    }

    /// The relay.
    #[must_use]
    pub fn relay(&self) -> &SignalingRelay<C, O> {
        &self.relay
    }

    /// Run the call until either side leaves or the channel closes.
    ///
    /// Teardown happens inside this future. If it is dropped before
    /// completing, the peer connection stays open and the peer is not told;
    /// use [`SessionHandle::leave`] to end the call.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::Subscribe`] when the room cannot be joined. All
    /// later failures are logged and the call keeps running.
    pub async fn run(mut self) -> Result<CallOutcome, CallError> {
        let topic = self.channel.topic().to_string();
        info!(room = %topic, participant = %self.local_id(), "Opening call session");

        if let Err(e) = self.channel.subscribe().await {
            error!(room = %topic, error = %e, "Failed to join room");
            return Err(CallError::Subscribe(e));
        }
        self.relay.on_subscribed();

        if let Err(e) = self.channel.track(self.presence_data.take()).await {
            error!(room = %topic, error = %e, "Failed to announce presence");
        }
        let roster = self.channel.presence_state();
        self.on_presence(&roster).await;

        let outcome = loop {
            tokio::select! {
                event = self.channel.next_event() => match event {
                    Some(ChannelEvent::Presence(members)) => self.on_presence(&members).await,
                    Some(ChannelEvent::Signal(Ok(signal))) => self.on_signal(signal).await,
                    Some(ChannelEvent::Signal(Err(e))) => {
                        warn!(room = %topic, error = %e, "Dropping malformed signal");
                    }
                    None => {
                        warn!(room = %topic, "Room channel closed");
                        self.relay.leave(&mut self.channel).await;
                        break CallOutcome::ChannelClosed;
                    }
                },
                candidate = next_candidate(&mut self.local_candidates) => match candidate {
                    Some(candidate) => self.on_local_candidate(candidate).await,
                    None => {
                        debug!(room = %topic, "Local candidate gathering finished");
                        self.local_candidates = None;
                    }
                },
                _ = &mut self.leave_rx => {
                    self.relay.leave(&mut self.channel).await;
                    break CallOutcome::LocalLeft;
                }
            }

            if self.relay.is_closed() {
                break CallOutcome::RemoteLeft;
            }
        };

        if self.channel.is_subscribed() {
            if let Err(e) = self.channel.unsubscribe().await {
                warn!(room = %topic, error = %e, "Failed to unsubscribe");
            }
        }
        info!(room = %topic, outcome = ?outcome, "Call session ended");
        Ok(outcome)
    }

    async fn on_presence(&mut self, members: &[ParticipantId]) {
        match self.resolver.on_presence_sync(members) {
            Ok(Some(role)) => {
                if let Err(e) = self.relay.on_role(role, &mut self.channel).await {
                    warn!(room = %self.channel.topic(), role = %role, error = %e, "Failed to start call");
                }
            }
            Ok(None) => {}
            Err(e) => debug!(room = %self.channel.topic(), error = %e, "Presence not usable"),
        }
    }

    async fn on_signal(&mut self, signal: Signal) {
        let kind = signal.kind();
        if let Err(e) = self.relay.handle_signal(signal, &mut self.channel).await {
            warn!(room = %self.channel.topic(), kind = %kind, error = %e, "Failed to handle signal");
        }
    }

    async fn on_local_candidate(&mut self, candidate: IceCandidate) {
        if let Err(e) = self
            .relay
            .send_local_candidate(candidate, &mut self.channel)
            .await
        {
            warn!(room = %self.channel.topic(), error = %e, "Failed to send candidate");
        }
    }
}

impl<C, O> CallSession<MemoryRoomChannel, C, O>
where
    C: PeerConnection,
    O: CallObserver,
{
    /// Open a session for `room_key` on an in-process hub.
    pub async fn in_memory(
        hub: Arc<RoomHub>,
        config: &CallConfig,
        room_key: &str,
        identity: &dyn IdentityProvider,
        connection: C,
        observer: O,
    ) -> (Self, SessionHandle) {
        let local_id = identity.participant_id().await;
        let channel = MemoryRoomChannel::new(hub, config.topic_for(room_key), local_id);
        Self::from_config(channel, config, connection, observer)
    }
}

impl<C, O> CallSession<WebSocketRoomChannel, C, O>
where
    C: PeerConnection,
    O: CallObserver,
{
    /// Open a session for `room_key` through a relay server.
    pub async fn over_websocket(
        websocket: WebSocketConfig,
        config: &CallConfig,
        room_key: &str,
        identity: &dyn IdentityProvider,
        connection: C,
        observer: O,
    ) -> (Self, SessionHandle) {
        let local_id = identity.participant_id().await;
        let channel = WebSocketRoomChannel::new(websocket, config.topic_for(room_key), local_id);
        Self::from_config(channel, config, connection, observer)
    }
}

impl<Ch, C, O> CallSession<Ch, C, O>
where
    Ch: RoomChannel,
    C: PeerConnection,
    O: CallObserver,
{
    fn from_config(channel: Ch, config: &CallConfig, connection: C, observer: O) -> (Self, SessionHandle) {
        let (mut session, handle) = Self::new(channel, connection, observer);
        session.presence_data = config.presence_data.clone();
        (session, handle)
    }
}

async fn next_candidate(
    candidates: &mut Option<mpsc::UnboundedReceiver<IceCandidate>>,
) -> Option<IceCandidate> {
    match candidates {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
