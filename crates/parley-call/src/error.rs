//! Call errors.

use parley_transport::TransportError;
use thiserror::Error;

use crate::connection::ConnectionError;
use crate::role::RoleError;

/// Errors surfaced by the call layer.
#[derive(Debug, Error)]
pub enum CallError {
    /// The room channel could not be joined. The call never starts.
    #[error("Subscribe failed: {0}")]
    Subscribe(#[source] TransportError),

    /// Sending a signal or leaving the room failed.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The peer connection rejected an operation.
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// The presence roster could not be turned into a role.
    #[error("Role error: {0}")]
    Role(#[from] RoleError),
}
