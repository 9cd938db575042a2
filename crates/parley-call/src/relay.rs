//! Signaling relay state machine.
//!
//! Applies inbound signals to the local [`PeerConnection`] and emits the
//! local side of the offer/answer exchange:
//!
//! ```text
//! Idle ──subscribed──▶ Joining ──Initiator──▶ OfferPending ──answer──▶ Connected
//!                         │                                               ▲
//!                         └────Responder──▶ AwaitingOffer ──offer─────────┘
//!
//! any state ──leave (local or remote)──▶ Closed
//! ```
//!
//! Candidates that arrive before a remote description is installed are
//! buffered in receipt order and flushed right after it is set.

use parley_protocol::{IceCandidate, SessionDescription, Signal};
use parley_transport::RoomChannel;
use std::fmt;
use tracing::{debug, info, trace, warn};

use crate::connection::PeerConnection;
use crate::error::CallError;
use crate::role::Role;

/// Call state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallState {
    /// Not subscribed yet.
    Idle,
    /// Subscribed, waiting for a role.
    Joining,
    /// Offer sent, waiting for the answer.
    OfferPending,
    /// Waiting for the peer's offer.
    AwaitingOffer,
    /// Offer/answer exchange complete.
    Connected,
    /// Torn down. Terminal.
    Closed,
}

impl CallState {
    /// Whether the call has been torn down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, CallState::Closed)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallState::Idle => "idle",
            CallState::Joining => "joining",
            CallState::OfferPending => "offer-pending",
            CallState::AwaitingOffer => "awaiting-offer",
            CallState::Connected => "connected",
            CallState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Receives call lifecycle notifications.
pub trait CallObserver: Send {
    /// Called on every state transition.
    fn on_state_change(&mut self, _from: CallState, _to: CallState) {}

    /// Called once when the call is torn down, whichever side ended it.
    fn on_exit(&mut self) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl CallObserver for NoopObserver {}

/// Per-participant signaling state machine.
pub struct SignalingRelay<C, O = NoopObserver> {
    state: CallState,
    role: Role,
    /// Taken on teardown, so the connection is closed exactly once.
    connection: Option<C>,
    observer: O,
    pending_candidates: Vec<IceCandidate>,
}

impl<C: PeerConnection> SignalingRelay<C> {
    /// Create a relay without an observer.
    #[must_use]
    pub fn new(connection: C) -> Self {
        Self::with_observer(connection, NoopObserver)
    }
}

impl<C: PeerConnection, O: CallObserver> SignalingRelay<C, O> {
    /// Create a relay that reports to `observer`.
    #[must_use]
    pub fn with_observer(connection: C, observer: O) -> Self {
        Self {
            state: CallState::Idle,
            role: Role::Unresolved,
            connection: Some(connection),
            observer,
            pending_candidates: Vec::new(),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> CallState {
        self.state
    }

    /// Role the relay is acting in.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Candidates waiting for a remote description, in receipt order.
    #[must_use]
    pub fn buffered_candidates(&self) -> &[IceCandidate] {
        &self.pending_candidates
    }

    /// Whether the call has been torn down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    /// The observer.
    #[must_use]
    pub fn observer(&self) -> &O {
        &self.observer
    }

    /// The connection, until teardown.
    #[must_use]
    pub fn connection(&self) -> Option<&C> {
        self.connection.as_ref()
    }

    fn transition(&mut self, to: CallState) {
        let from = self.state;
        if from == to {
            return;
        }
        debug!(from = %from, to = %to, "Call state changed");
        self.state = to;
        self.observer.on_state_change(from, to);
    }

    /// The room channel is subscribed.
    pub fn on_subscribed(&mut self) {
        match self.state {
            CallState::Idle => self.transition(CallState::Joining),
            state => debug!(state = %state, "Subscribed notification ignored"),
        }
    }

    /// A role was resolved.
    ///
    /// The initiator starts media and sends its offer; the responder starts
    /// media and waits. Ignored outside `Joining`, e.g. when an early offer
    /// already made this side the responder.
    ///
    /// # Errors
    ///
    /// Returns an error when media, offer creation or the send fails. A
    /// failure before the offer exists leaves the state unchanged.
    pub async fn on_role<Ch>(&mut self, role: Role, channel: &mut Ch) -> Result<(), CallError>
    where
        Ch: RoomChannel + ?Sized,
    {
        if self.state != CallState::Joining {
            debug!(state = %self.state, role = %role, "Role ignored outside joining");
            return Ok(());
        }
        let Some(connection) = self.connection.as_mut() else {
            return Ok(());
        };

        match role {
            Role::Initiator => {
                connection.start_local_media().await?;
                let offer = connection.create_offer().await?;
                self.role = role;
                self.transition(CallState::OfferPending);

                info!(room = %channel.topic(), "Sending offer");
                channel.send(&Signal::Offer(offer)).await?;
            }
            Role::Responder => {
                connection.start_local_media().await?;
                self.role = role;
                self.transition(CallState::AwaitingOffer);
            }
            Role::Unresolved => {}
        }
        Ok(())
    }

    /// Apply a signal from the peer.
    ///
    /// # Errors
    ///
    /// Returns an error when the connection rejects a description or when
    /// sending the answer fails. Unexpected signals are dropped, not errors.
    pub async fn handle_signal<Ch>(
        &mut self,
        signal: Signal,
        channel: &mut Ch,
    ) -> Result<(), CallError>
    where
        Ch: RoomChannel + ?Sized,
    {
        if self.state.is_closed() {
            trace!(kind = %signal.kind(), "Signal after close dropped");
            return Ok(());
        }

        match signal {
            Signal::Offer(offer) => match self.state {
                CallState::AwaitingOffer | CallState::Joining => {
                    self.accept_offer(offer, channel).await
                }
                state => {
                    warn!(state = %state, "Dropping unexpected offer");
                    Ok(())
                }
            },
            Signal::Answer(answer) => match self.state {
                CallState::OfferPending => {
                    self.apply_remote_description(answer).await?;
                    self.transition(CallState::Connected);
                    Ok(())
                }
                state => {
                    warn!(state = %state, "Dropping unexpected answer");
                    Ok(())
                }
            },
            Signal::IceCandidate(candidate) => {
                self.apply_candidate(candidate).await;
                Ok(())
            }
            Signal::Leave => {
                info!(room = %channel.topic(), "Peer left");
                self.teardown().await;
                Ok(())
            }
        }
    }

    async fn accept_offer<Ch>(
        &mut self,
        offer: SessionDescription,
        channel: &mut Ch,
    ) -> Result<(), CallError>
    where
        Ch: RoomChannel + ?Sized,
    {
        if self.state == CallState::Joining {
            // The offer outran our own presence sync; only the responder
            // ever receives one.
            if let Some(connection) = self.connection.as_mut() {
                connection.start_local_media().await?;
            }
            self.role = Role::Responder;
        }

        self.apply_remote_description(offer).await?;

        let Some(connection) = self.connection.as_mut() else {
            return Ok(());
        };
        let answer = connection.create_answer().await?;
        self.transition(CallState::Connected);

        info!(room = %channel.topic(), "Sending answer");
        channel.send(&Signal::Answer(answer)).await?;
        Ok(())
    }

    async fn apply_remote_description(
        &mut self,
        description: SessionDescription,
    ) -> Result<(), CallError> {
        let Some(connection) = self.connection.as_mut() else {
            return Ok(());
        };
        connection.set_remote_description(description).await?;

        let pending = std::mem::take(&mut self.pending_candidates);
        if !pending.is_empty() {
            debug!(count = pending.len(), "Flushing buffered candidates");
        }
        for candidate in pending {
            if let Err(e) = connection.add_ice_candidate(candidate).await {
                warn!(error = %e, "Buffered candidate rejected");
            }
        }
        Ok(())
    }

    async fn apply_candidate(&mut self, candidate: IceCandidate) {
        let Some(connection) = self.connection.as_mut() else {
            return;
        };
        if !connection.has_remote_description() {
            self.pending_candidates.push(candidate);
            debug!(buffered = self.pending_candidates.len(), "Candidate buffered");
            return;
        }
        if let Err(e) = connection.add_ice_candidate(candidate).await {
            warn!(error = %e, "Candidate rejected");
        }
    }

    /// Forward a locally gathered candidate to the peer.
    ///
    /// # Errors
    ///
    /// Returns an error when the send fails.
    pub async fn send_local_candidate<Ch>(
        &mut self,
        candidate: IceCandidate,
        channel: &mut Ch,
    ) -> Result<(), CallError>
    where
        Ch: RoomChannel + ?Sized,
    {
        if self.state.is_closed() {
            trace!("Local candidate after close dropped");
            return Ok(());
        }
        channel.send(&Signal::IceCandidate(candidate)).await?;
        Ok(())
    }

    /// Leave the call.
    ///
    /// Tells the peer (best effort), unsubscribes and tears down. Completes
    /// even when the channel is already gone. Calling it again is a no-op.
    pub async fn leave<Ch>(&mut self, channel: &mut Ch)
    where
        Ch: RoomChannel + ?Sized,
    {
        if self.state.is_closed() {
            return;
        }
        info!(room = %channel.topic(), "Leaving call");

        if channel.is_subscribed() {
            if let Err(e) = channel.send(&Signal::Leave).await {
                warn!(room = %channel.topic(), error = %e, "Failed to notify peer of leave");
            }
            if let Err(e) = channel.unsubscribe().await {
                warn!(room = %channel.topic(), error = %e, "Failed to unsubscribe");
            }
        }
        self.teardown().await;
    }

    async fn teardown(&mut self) {
        if self.state.is_closed() {
            return;
        }
        self.transition(CallState::Closed);
        self.pending_candidates.clear();
        if let Some(mut connection) = self.connection.take() {
            connection.close().await;
        }
        self.observer.on_exit();
    }
}
