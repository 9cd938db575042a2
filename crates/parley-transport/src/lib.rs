//! # parley-transport
//!
//! Room channel clients for Parley.
//!
//! A [`RoomChannel`] is one participant's connection to a room topic:
//!
//! - **MemoryRoomChannel** - bound directly to an in-process `RoomHub`
//! - **WebSocketRoomChannel** - talks the framed room protocol to a relay
//!   server
//!
//! ```rust,ignore
//! use parley_transport::{ChannelEvent, RoomChannel};
//!
//! async fn watch(mut channel: impl RoomChannel) {
//!     channel.subscribe().await?;
//!     channel.track(None).await?;
//!     while let Some(event) = channel.next_event().await {
//!         // React to presence and signals
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use memory::MemoryRoomChannel;
pub use traits::{ChannelEvent, RoomChannel, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConfig, WebSocketRoomChannel};
