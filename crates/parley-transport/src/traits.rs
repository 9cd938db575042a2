//! Room channel abstraction.
//!
//! A room channel is one participant's view of a room: it joins the room
//! topic, announces presence, sends signals to the other participant and
//! yields presence and signal events. The call layer only talks to this
//! trait, so it runs unchanged over the in-process hub or a relay server.

use async_trait::async_trait;
use parley_core::HubError;
use parley_protocol::{ParticipantId, ProtocolError, Signal, SignalError, SignalKind};
use thiserror::Error;
use tracing::debug;

/// An event observed on a room channel.
#[derive(Debug)]
pub enum ChannelEvent {
    /// The presence roster changed. Members are sorted by id.
    Presence(Vec<ParticipantId>),
    /// A signal from the other participant. Malformed payloads are passed
    /// through as errors so the receiver decides how to report them.
    Signal(Result<Signal, SignalError>),
}

impl ChannelEvent {
    /// Build an event from a room broadcast.
    ///
    /// Returns `None` for broadcast events that are not call signals.
    #[must_use]
    pub fn from_broadcast(event: &str, payload: &[u8]) -> Option<Self> {
        if SignalKind::from_event(event).is_none() {
            debug!(event = %event, "Ignoring non-signal broadcast");
            return None;
        }
        Some(ChannelEvent::Signal(Signal::from_json(payload)))
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The channel is closed.
    #[error("Channel closed")]
    ChannelClosed,

    /// The operation needs a subscribed channel.
    #[error("Not subscribed to {0}")]
    NotSubscribed(String),

    /// Joining the room failed.
    #[error("Subscribe failed: {0}")]
    SubscribeFailed(String),

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// The server answered a request with an error frame.
    #[error("Server error {code}: {message}")]
    Server { code: u16, message: String },

    /// No answer arrived in time.
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    /// Room hub refused the operation.
    #[error("Hub error: {0}")]
    Hub(#[from] HubError),

    /// Frame codec error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Signal encoding error.
    #[error("Signal error: {0}")]
    Signal(#[from] SignalError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One participant's channel to a room.
#[async_trait]
pub trait RoomChannel: Send {
    /// Room topic this channel is bound to.
    fn topic(&self) -> &str;

    /// Presence key of the local participant.
    fn local_id(&self) -> &ParticipantId;

    /// Whether `subscribe` completed and `unsubscribe` has not run.
    fn is_subscribed(&self) -> bool;

    /// Join the room. Nothing can be sent or received before this resolves.
    async fn subscribe(&mut self) -> Result<(), TransportError>;

    /// Announce the local participant in the room's presence set.
    async fn track(&mut self, data: Option<serde_json::Value>) -> Result<(), TransportError>;

    /// Broadcast a signal to the other members.
    async fn send(&mut self, signal: &Signal) -> Result<(), TransportError>;

    /// Wait for the next event. Returns `None` once the channel is closed.
    async fn next_event(&mut self) -> Option<ChannelEvent>;

    /// Last known presence roster, sorted by id.
    fn presence_state(&self) -> Vec<ParticipantId>;

    /// Leave the room. Calling it on an unsubscribed channel is a no-op.
    async fn unsubscribe(&mut self) -> Result<(), TransportError>;
}
