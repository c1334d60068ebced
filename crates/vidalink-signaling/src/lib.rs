//! Room-based call signaling for VidaLink.
//!
//! A room is a small shared record (offer, answer, two append-only candidate
//! lists) that two peers edit to negotiate a call. This crate defines the
//! [`SignalingChannel`] store contract plus two implementations and the wire
//! protocol the relay-backed one speaks.
//!
//! # Architecture
//!
//! ```text
//! CallSession ──► SignalingChannel (trait)
//!                   ├─ MemorySignaling              in-process store
//!                   └─ RemoteSignaling ─ TLS TCP ──► vidalink-relay
//!                                                      └─ MemorySignaling
//! ```
//!
//! Both implementations give subscribers the same guarantee: a replay of the
//! room record as events, then the live tail, with no gap and no reordering.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use vidalink_core::SessionDescription;
//! use vidalink_signaling::{MemorySignaling, SignalingChannel};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = MemorySignaling::new();
//!     let room_id = store.create_room().await?;
//!     store.publish_offer(&room_id, SessionDescription::offer("v=0")).await?;
//!
//!     let mut events = store.subscribe(&room_id).await?;
//!     while let Some(event) = events.recv().await {
//!         println!("{event:?}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod memory;
pub mod remote;
pub mod wire;

pub use channel::{RoomEvent, RoomEvents, SignalingChannel};
pub use memory::MemorySignaling;
pub use remote::RemoteSignaling;
