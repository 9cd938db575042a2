//! Peer connection abstraction.
//!
//! The call layer never touches media or ICE itself. It drives a
//! [`PeerConnection`] supplied by the application, which wraps whatever
//! WebRTC engine is in use.

use async_trait::async_trait;
use parley_protocol::{IceCandidate, SessionDescription};
use thiserror::Error;
use tokio::sync::mpsc;

/// A failed peer connection operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} failed: {message}")]
pub struct ConnectionError {
    /// Operation that failed, e.g. `create_offer`.
    pub operation: &'static str,
    /// Engine-provided detail.
    pub message: String,
}

impl ConnectionError {
    /// Create a new connection error.
    pub fn new(operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
        }
    }
}

/// The local end of a WebRTC peer connection.
#[async_trait]
pub trait PeerConnection: Send {
    /// Acquire local audio/video and attach it to the connection.
    async fn start_local_media(&mut self) -> Result<(), ConnectionError>;

    /// Create an offer and install it as the local description.
    async fn create_offer(&mut self) -> Result<SessionDescription, ConnectionError>;

    /// Create an answer and install it as the local description.
    ///
    /// Only valid once a remote offer has been set.
    async fn create_answer(&mut self) -> Result<SessionDescription, ConnectionError>;

    /// Install the peer's offer or answer.
    async fn set_remote_description(
        &mut self,
        description: SessionDescription,
    ) -> Result<(), ConnectionError>;

    /// Whether a remote description is installed.
    fn has_remote_description(&self) -> bool;

    /// Apply a candidate received from the peer.
    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<(), ConnectionError>;

    /// Hand over the stream of locally gathered candidates.
    ///
    /// Returns `Some` at most once; the caller forwards every candidate to
    /// the peer.
    fn take_local_candidates(&mut self) -> Option<mpsc::UnboundedReceiver<IceCandidate>>;

    /// Stop local tracks and close the connection.
    async fn close(&mut self);
}
