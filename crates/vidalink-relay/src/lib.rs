//! VidaLink signaling relay.
//!
//! Serves a [`SignalingChannel`](vidalink_signaling::SignalingChannel) room
//! store to remote clients over TLS TCP, speaking the framed protocol from
//! [`vidalink_signaling::wire`]. The client-side counterpart is
//! [`RemoteSignaling`](vidalink_signaling::RemoteSignaling).
//!
//! Signaling only: media always flows peer to peer, never through the relay.

pub mod server;
pub mod tls;

pub use server::{serve, serve_on};
