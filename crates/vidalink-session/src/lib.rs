//! Call establishment for VidaLink.
//!
//! Two clients agree on a room identifier, exchange an offer/answer pair and
//! a trickle of ICE candidates through a [`SignalingChannel`], and converge
//! on one active media connection. This crate owns the per-call state
//! machine ([`CallSession`]), the two role flows, and the [`ActiveCall`]
//! handle they return.
//!
//! ```text
//! caller                        room record                        callee
//! ──────                        ───────────                        ──────
//! create_room ───────────────► id, offer          ◄─────────────── join_room
//! candidates ────────────────► callerCandidates ─────────────────► apply/queue
//! apply/queue ◄──────────────── calleeCandidates ◄──────────────── candidates
//! connected ◄───────────────── answer             ◄─────────────── connected
//! ```
//!
//! Store and peer primitive are injected as trait objects
//! ([`SignalingChannel`], [`PeerConnection`]); the negotiation logic never
//! names a concrete implementation of either.
//!
//! [`SignalingChannel`]: vidalink_signaling::SignalingChannel
//! [`PeerConnection`]: vidalink_peer::PeerConnection

pub mod flows;
pub mod session;

pub use flows::{create_room, join_room, ActiveCall};
pub use session::{CallEvent, CallSession};
