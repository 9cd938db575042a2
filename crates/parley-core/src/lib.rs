//! # parley-core
//!
//! Room hub for Parley call signaling.
//!
//! This crate provides the room channel transport that call participants
//! meet on:
//!
//! - **Room** - a named broadcast topic with members and presence
//! - **Presence** - the roster of participants that announced themselves
//! - **RoomHub** - shared registry that routes joins, presence and broadcasts
//! - **RoomEvent** - what members receive
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  join/track  ┌─────────────┐      ┌─────────────┐
//! │ Participant │─────────────▶│   RoomHub   │─────▶│    Room     │
//! └─────────────┘              └─────────────┘      └─────────────┘
//!        ▲                                                 │
//!        │              RoomEvent (broadcast, sync)        ▼
//!        └─────────────────────────────────────────  ┌─────────────┐
//!                                                    │  Presence   │
//!                                                    └─────────────┘
//! ```

pub mod event;
pub mod hub;
pub mod presence;
pub mod room;

pub use event::RoomEvent;
pub use hub::{HubConfig, HubError, HubStats, RoomHub};
pub use presence::{Presence, PresenceState};
pub use room::{validate_topic, Room, RoomTopic};
