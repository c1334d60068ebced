use thiserror::Error;

use crate::types::NegotiationState;

#[derive(Error, Debug)]
pub enum SignalingError {
    #[error("Room not found: {room_id}")]
    RoomNotFound { room_id: String },

    #[error("Connection closed by relay")]
    ConnectionClosed,

    #[error("Send failed: {reason}")]
    SendFailed { reason: String },

    #[error("Receive failed: {reason}")]
    ReceiveFailed { reason: String },

    #[error("Protocol error: {reason}")]
    Protocol { reason: String },

    #[error("Timeout after {ms}ms")]
    Timeout { ms: u64 },
}

#[derive(Error, Debug)]
pub enum PeerError {
    #[error("Media access denied: {reason}")]
    MediaAccessDenied { reason: String },

    #[error("Negotiation failed: {reason}")]
    NegotiationFailed { reason: String },

    #[error("Candidate rejected: {reason}")]
    CandidateRejected { reason: String },

    #[error("Peer connection closed")]
    Closed,
}

#[derive(Error, Debug)]
pub enum CallError {
    #[error("Signaling error: {0}")]
    Signaling(#[from] SignalingError),

    #[error("Peer error: {0}")]
    Peer(#[from] PeerError),

    #[error("Signaling events ended before negotiation completed")]
    EventsClosed,

    #[error("Remote description not expected in state {state}")]
    UnexpectedRemoteDescription { state: NegotiationState },
}

impl CallError {
    /// True when the failure is the joiner-facing "no such room" case, which
    /// callers surface to the user instead of logging as a fault.
    pub fn is_room_not_found(&self) -> bool {
        matches!(self, Self::Signaling(SignalingError::RoomNotFound { .. }))
    }
}
