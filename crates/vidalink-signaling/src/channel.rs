use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use vidalink_core::{
    CallRole, IceCandidate, RoomId, RoomSnapshot, SessionDescription, SignalingError,
};

// MARK: - RoomEvent

/// Change notification for one room record.
///
/// Subscriptions replay the room's current contents as events before the live
/// tail, so a late subscriber observes the same sequence an early one did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RoomEvent {
    /// The offer field was set.
    OfferPublished { offer: SessionDescription },

    /// The answer field was set.
    AnswerPublished { answer: SessionDescription },

    /// A candidate was appended to `role`'s list.
    CandidateAdded { role: CallRole, candidate: IceCandidate },
}

// MARK: - RoomEvents

/// Ordered stream of [`RoomEvent`]s for one room.
///
/// Starts with a replay of the room's contents at subscription time, then
/// carries live events with no gap and no duplication.
#[derive(Debug)]
pub struct RoomEvents {
    rx: mpsc::UnboundedReceiver<RoomEvent>,
}

impl RoomEvents {
    pub fn new(rx: mpsc::UnboundedReceiver<RoomEvent>) -> Self {
        Self { rx }
    }

    /// Next event; `None` once the store or connection drops the
    /// subscription.
    pub async fn recv(&mut self) -> Option<RoomEvent> {
        self.rx.recv().await
    }
}

// MARK: - SignalingChannel trait

/// Store contract for call signaling.
///
/// The negotiation logic never names a concrete store; anything that can
/// create room records, set the offer/answer fields (last-write-wins), append
/// to the two candidate lists, and stream change events satisfies the
/// contract.
///
/// Implementations:
/// - [`MemorySignaling`](crate::MemorySignaling): in-process store
/// - [`RemoteSignaling`](crate::RemoteSignaling): TLS client against a
///   `vidalink-relay` server
///
/// Every operation naming an unknown room fails with
/// [`SignalingError::RoomNotFound`] and performs no writes.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Create an empty room record under a fresh unique identifier.
    async fn create_room(&self) -> Result<RoomId, SignalingError>;

    /// Read the full current record.
    async fn fetch_room(&self, room_id: &RoomId) -> Result<RoomSnapshot, SignalingError>;

    /// Set the offer field (last-write-wins).
    async fn publish_offer(
        &self,
        room_id: &RoomId,
        offer: SessionDescription,
    ) -> Result<(), SignalingError>;

    /// Set the answer field (last-write-wins).
    async fn publish_answer(
        &self,
        room_id: &RoomId,
        answer: SessionDescription,
    ) -> Result<(), SignalingError>;

    /// Append a candidate to `role`'s list. Lists are append-only.
    async fn publish_candidate(
        &self,
        room_id: &RoomId,
        role: CallRole,
        candidate: IceCandidate,
    ) -> Result<(), SignalingError>;

    /// Subscribe to the room's events (replay, then live tail).
    async fn subscribe(&self, room_id: &RoomId) -> Result<RoomEvents, SignalingError>;
}
