use async_trait::async_trait;
use tokio::sync::broadcast;
use vidalink_core::{IceCandidate, MediaConstraints, PeerError, RemoteTrack, SessionDescription};

// MARK: - PeerConnection trait

/// Abstract interface over the platform's connection-negotiation primitive.
///
/// The session layer drives negotiation exclusively through this trait so the
/// actual primitive (a browser `RTCPeerConnection` behind FFI, a native WebRTC
/// stack, a scripted fake in tests) stays outside the call logic.
///
/// Contract notes:
/// - `add_ice_candidate` must only be called once a remote description has
///   been set; the session layer guarantees this via its pending queue.
/// - `events()` may be called any number of times; every receiver sees every
///   event emitted after it subscribed.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Acquire local media (camera/microphone) and attach it to the
    /// connection. Failure aborts call setup.
    async fn start_media(&self, constraints: &MediaConstraints) -> Result<(), PeerError>;

    /// Produce a local session offer.
    async fn create_offer(&self) -> Result<SessionDescription, PeerError>;

    /// Produce a local session answer to a previously applied remote offer.
    async fn create_answer(&self) -> Result<SessionDescription, PeerError>;

    /// Apply a locally generated description.
    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), PeerError>;

    /// Apply the remote side's description.
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), PeerError>;

    /// Apply a trickled remote candidate. Requires a remote description.
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError>;

    /// Subscribe to asynchronous peer notifications.
    fn events(&self) -> broadcast::Receiver<PeerEvent>;

    /// Release the connection and any captured media.
    async fn close(&self) -> Result<(), PeerError>;
}

// MARK: - PeerEvent

/// Asynchronous notifications emitted by a peer connection.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// A local network-path candidate was discovered and should be trickled
    /// to the remote side through the signaling channel.
    CandidateDiscovered(IceCandidate),

    /// A remote media track arrived on the established connection.
    TrackAdded(RemoteTrack),
}
