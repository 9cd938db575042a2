//! # parley-call
//!
//! One participant's side of a 1:1 WebRTC call.
//!
//! - **RoleResolver** - turns the room's presence roster into a role, with
//!   both peers reaching complementary answers independently
//! - **SignalingRelay** - the offer/answer/ICE state machine around a
//!   [`PeerConnection`]
//! - **CallSession** - owns the room channel and drives both from one task
//!
//! ## Example
//!
//! ```no_run
//! # use parley_call::{CallConfig, CallSession, GeneratedIdentity, NoopObserver, PeerConnection};
//! # use parley_core::RoomHub;
//! # use std::sync::Arc;
//! # async fn call(connection: impl PeerConnection + 'static) -> Result<(), parley_call::CallError> {
//! let hub = Arc::new(RoomHub::new());
//! let (session, handle) = CallSession::in_memory(
//!     hub,
//!     &CallConfig::default(),
//!     "room-1",
//!     &GeneratedIdentity::new(),
//!     connection,
//!     NoopObserver,
//! )
//! .await;
//!
//! let call = tokio::spawn(session.run());
//! // ... later, when the user hangs up:
//! handle.leave();
//! # let _ = call.await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod identity;
pub mod relay;
pub mod role;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use config::CallConfig;
pub use connection::{ConnectionError, PeerConnection};
pub use error::CallError;
pub use identity::{FixedIdentity, GeneratedIdentity, IdentityProvider};
pub use relay::{CallObserver, CallState, NoopObserver, SignalingRelay};
pub use role::{resolve_pair, role_for, Role, RoleError, RoleResolver};
pub use session::{CallOutcome, CallSession, SessionHandle};
