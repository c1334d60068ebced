//! In-process signaling store.
//!
//! `MemorySignaling` keeps every room in a mutex-guarded map for the lifetime
//! of the process; rooms are never deleted. Subscriber fan-out happens under
//! the same lock as the mutation, which is what makes the replay-then-live
//! subscription gap-free: a subscriber either sees a write in its replay or
//! in its live tail, never twice and never not at all.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;
use vidalink_core::{
    CallRole, IceCandidate, RoomId, RoomSnapshot, SessionDescription, SignalingError,
};

use crate::channel::{RoomEvent, RoomEvents, SignalingChannel};

// MARK: - RoomRecord

#[derive(Default)]
struct RoomRecord {
    offer: Option<SessionDescription>,
    answer: Option<SessionDescription>,
    caller_candidates: Vec<IceCandidate>,
    callee_candidates: Vec<IceCandidate>,
    subscribers: Vec<mpsc::UnboundedSender<RoomEvent>>,
}

impl RoomRecord {
    fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            offer: self.offer.clone(),
            answer: self.answer.clone(),
            caller_candidates: self.caller_candidates.clone(),
            callee_candidates: self.callee_candidates.clone(),
        }
    }

    /// Replay the current contents into a fresh subscription, in publication
    /// order per field.
    fn replay(&self, tx: &mpsc::UnboundedSender<RoomEvent>) {
        if let Some(offer) = &self.offer {
            let _ = tx.send(RoomEvent::OfferPublished { offer: offer.clone() });
        }
        if let Some(answer) = &self.answer {
            let _ = tx.send(RoomEvent::AnswerPublished { answer: answer.clone() });
        }
        for candidate in &self.caller_candidates {
            let _ = tx.send(RoomEvent::CandidateAdded {
                role: CallRole::Caller,
                candidate: candidate.clone(),
            });
        }
        for candidate in &self.callee_candidates {
            let _ = tx.send(RoomEvent::CandidateAdded {
                role: CallRole::Callee,
                candidate: candidate.clone(),
            });
        }
    }

    fn publish(&mut self, event: RoomEvent) {
        // Dead subscriptions are pruned lazily on the next publish.
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

// MARK: - MemorySignaling

/// In-process [`SignalingChannel`] backed by a room map.
pub struct MemorySignaling {
    rooms: Mutex<HashMap<RoomId, RoomRecord>>,
}

impl MemorySignaling {
    pub fn new() -> Self {
        Self { rooms: Mutex::new(HashMap::new()) }
    }

    /// Number of rooms currently held.
    pub fn room_count(&self) -> usize {
        self.rooms.lock().unwrap().len()
    }

    fn with_room<T>(
        &self,
        room_id: &RoomId,
        f: impl FnOnce(&mut RoomRecord) -> T,
    ) -> Result<T, SignalingError> {
        let mut rooms = self.rooms.lock().unwrap();
        match rooms.get_mut(room_id) {
            Some(record) => Ok(f(record)),
            None => Err(SignalingError::RoomNotFound { room_id: room_id.to_string() }),
        }
    }
}

impl Default for MemorySignaling {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SignalingChannel for MemorySignaling {
    async fn create_room(&self) -> Result<RoomId, SignalingError> {
        let room_id = RoomId::new(Uuid::new_v4().to_string());
        self.rooms
            .lock()
            .unwrap()
            .insert(room_id.clone(), RoomRecord::default());
        debug!("Room created: {}", room_id);
        Ok(room_id)
    }

    async fn fetch_room(&self, room_id: &RoomId) -> Result<RoomSnapshot, SignalingError> {
        self.with_room(room_id, |record| record.snapshot())
    }

    async fn publish_offer(
        &self,
        room_id: &RoomId,
        offer: SessionDescription,
    ) -> Result<(), SignalingError> {
        self.with_room(room_id, |record| {
            record.offer = Some(offer.clone());
            record.publish(RoomEvent::OfferPublished { offer });
        })?;
        debug!("Offer published to room {}", room_id);
        Ok(())
    }

    async fn publish_answer(
        &self,
        room_id: &RoomId,
        answer: SessionDescription,
    ) -> Result<(), SignalingError> {
        self.with_room(room_id, |record| {
            record.answer = Some(answer.clone());
            record.publish(RoomEvent::AnswerPublished { answer });
        })?;
        debug!("Answer published to room {}", room_id);
        Ok(())
    }

    async fn publish_candidate(
        &self,
        room_id: &RoomId,
        role: CallRole,
        candidate: IceCandidate,
    ) -> Result<(), SignalingError> {
        self.with_room(room_id, |record| {
            match role {
                CallRole::Caller => record.caller_candidates.push(candidate.clone()),
                CallRole::Callee => record.callee_candidates.push(candidate.clone()),
            }
            record.publish(RoomEvent::CandidateAdded { role, candidate });
        })?;
        trace!("Candidate appended to room {} ({})", room_id, role);
        Ok(())
    }

    async fn subscribe(&self, room_id: &RoomId) -> Result<RoomEvents, SignalingError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.with_room(room_id, |record| {
            record.replay(&tx);
            record.subscribers.push(tx);
        })?;
        debug!("Subscription opened on room {}", room_id);
        Ok(RoomEvents::new(rx))
    }
}

// MARK: - Tests
