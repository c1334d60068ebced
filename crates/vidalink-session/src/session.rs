//! Per-call negotiation state machine.
//!
//! One [`CallSession`] owns everything a single call needs: the peer handle,
//! the pending-candidate queue, and the negotiation state. It is driven by
//! named events (`RoomEvent` from the store, `PeerEvent` from the connection)
//! and performs no spawning or waiting of its own, so the transition logic is
//! independent of whatever delivers the events. The async pump in
//! [`flows`](crate::flows) is one such driver; tests call the handlers
//! directly.
//!
//! # State machine (per side)
//!
//! ```text
//! NoConnection ──begin_awaiting_remote()──► AwaitingRemoteDescription
//! AwaitingRemoteDescription ──first remote description──► Connected
//! ```
//!
//! The transition to `Connected` happens exactly once, on the first
//! successful remote-description assignment. Draining the pending-candidate
//! queue is the side effect of that transition, not a separate step.

use std::mem;
use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};
use vidalink_core::{
    CallError, CallRole, IceCandidate, NegotiationState, RemoteTrack, RoomId, SessionDescription,
};
use vidalink_peer::{PeerConnection, PeerEvent};
use vidalink_signaling::{RoomEvent, SignalingChannel};

const CALL_EVENT_CAPACITY: usize = 64;

// MARK: - CallEvent

/// Outward notifications for the owner of an active call.
#[derive(Debug, Clone, PartialEq)]
pub enum CallEvent {
    /// Remote media arrived on the established connection.
    TrackAdded(RemoteTrack),

    /// The call attempt failed; the event pump has stopped.
    Failed { reason: String },
}

// MARK: - CallSession

/// State and resources of one call attempt, for one side.
pub struct CallSession {
    role: CallRole,
    room_id: RoomId,
    peer: Arc<dyn PeerConnection>,
    signaling: Arc<dyn SignalingChannel>,
    state: NegotiationState,
    /// Remote candidates received before a remote description was set,
    /// in arrival order.
    pending: Vec<IceCandidate>,
    state_tx: watch::Sender<NegotiationState>,
    events_tx: broadcast::Sender<CallEvent>,
}

impl CallSession {
    pub fn new(
        role: CallRole,
        room_id: RoomId,
        peer: Arc<dyn PeerConnection>,
        signaling: Arc<dyn SignalingChannel>,
    ) -> Self {
        let (state_tx, _) = watch::channel(NegotiationState::NoConnection);
        let (events_tx, _) = broadcast::channel(CALL_EVENT_CAPACITY);
        Self {
            role,
            room_id,
            peer,
            signaling,
            state: NegotiationState::NoConnection,
            pending: Vec::new(),
            state_tx,
            events_tx,
        }
    }

    pub fn role(&self) -> CallRole {
        self.role
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    /// Handle to the peer connection this session drives.
    pub fn peer(&self) -> Arc<dyn PeerConnection> {
        self.peer.clone()
    }

    /// Number of remote candidates waiting for a remote description.
    pub fn pending_candidates(&self) -> usize {
        self.pending.len()
    }

    /// Watch-style view of the negotiation state.
    pub fn state_receiver(&self) -> watch::Receiver<NegotiationState> {
        self.state_tx.subscribe()
    }

    /// New receiver for [`CallEvent`]s emitted from now on.
    pub fn subscribe_events(&self) -> broadcast::Receiver<CallEvent> {
        self.events_tx.subscribe()
    }

    pub(crate) fn events_sender(&self) -> broadcast::Sender<CallEvent> {
        self.events_tx.clone()
    }

    // MARK: - Transitions

    /// Local side is published and waiting for the remote description.
    pub fn begin_awaiting_remote(&mut self) {
        match self.state {
            NegotiationState::NoConnection => {
                self.set_state(NegotiationState::AwaitingRemoteDescription);
            }
            other => debug!("begin_awaiting_remote ignored in state {}", other),
        }
    }

    fn set_state(&mut self, next: NegotiationState) {
        if next == self.state {
            return;
        }
        info!("Negotiation state ({}): {}", self.role, next);
        self.state = next;
        let _ = self.state_tx.send(next);
    }

    // MARK: - Room events

    /// Apply one store event. Events for this session's own role are echoes
    /// of its own writes and are ignored.
    pub async fn handle_room_event(&mut self, event: RoomEvent) -> Result<(), CallError> {
        match event {
            RoomEvent::OfferPublished { offer } => match self.role {
                CallRole::Callee => self.apply_remote_description(offer).await,
                CallRole::Caller => {
                    debug!("Ignoring own offer echo");
                    Ok(())
                }
            },
            RoomEvent::AnswerPublished { answer } => match self.role {
                CallRole::Caller => self.apply_remote_description(answer).await,
                CallRole::Callee => {
                    debug!("Ignoring own answer echo");
                    Ok(())
                }
            },
            RoomEvent::CandidateAdded { role, candidate } => {
                if role == self.role {
                    debug!("Ignoring own candidate echo");
                    return Ok(());
                }
                self.apply_or_queue(candidate).await;
                Ok(())
            }
        }
    }

    /// First remote description connects the session and drains the queue;
    /// repeats are ignored (the store's offer/answer fields are
    /// last-write-wins, but only the first write negotiates).
    async fn apply_remote_description(
        &mut self,
        desc: SessionDescription,
    ) -> Result<(), CallError> {
        match self.state {
            NegotiationState::Connected => {
                debug!("Ignoring repeated {} (already connected)", desc.kind);
                return Ok(());
            }
            NegotiationState::NoConnection => {
                return Err(CallError::UnexpectedRemoteDescription { state: self.state });
            }
            NegotiationState::AwaitingRemoteDescription => {}
        }

        self.peer.set_remote_description(desc).await?;
        self.set_state(NegotiationState::Connected);

        let queued = mem::take(&mut self.pending);
        let drained = queued.len();
        for candidate in queued {
            self.apply_candidate(candidate).await;
        }
        info!(
            "Remote description applied ({}); drained {} queued candidate(s)",
            self.role, drained
        );

        if self.role == CallRole::Callee {
            self.publish_answer().await?;
        }
        Ok(())
    }

    /// Produce and publish the local answer (callee side, after the offer
    /// has been applied).
    async fn publish_answer(&mut self) -> Result<(), CallError> {
        let answer = self.peer.create_answer().await?;
        self.peer.set_local_description(answer.clone()).await?;
        self.signaling.publish_answer(&self.room_id, answer).await?;
        info!("Published answer for room {}", self.room_id);
        Ok(())
    }

    /// Apply a remote candidate now, or queue it until a remote description
    /// exists. Candidates must never reach the peer before then.
    async fn apply_or_queue(&mut self, candidate: IceCandidate) {
        if self.state.is_connected() {
            self.apply_candidate(candidate).await;
        } else {
            self.pending.push(candidate);
            debug!(
                "Queued remote candidate #{} (no remote description yet)",
                self.pending.len()
            );
        }
    }

    /// One application attempt per candidate; a rejected candidate is logged
    /// and dropped, the call continues on the remaining paths.
    async fn apply_candidate(&mut self, candidate: IceCandidate) {
        if let Err(e) = self.peer.add_ice_candidate(candidate).await {
            warn!("Candidate application failed: {}", e);
        }
    }

    // MARK: - Peer events

    /// React to one peer notification: trickle discovered local candidates
    /// into this side's list, surface arriving remote tracks.
    pub async fn handle_peer_event(&mut self, event: PeerEvent) -> Result<(), CallError> {
        match event {
            PeerEvent::CandidateDiscovered(candidate) => {
                self.signaling
                    .publish_candidate(&self.room_id, self.role, candidate)
                    .await?;
                debug!("Trickled local candidate ({})", self.role);
                Ok(())
            }
            PeerEvent::TrackAdded(track) => {
                self.emit_track(track);
                Ok(())
            }
        }
    }

    fn emit_track(&self, track: RemoteTrack) {
        info!("Remote {} track added ({})", track.kind, track.id);
        let _ = self.events_tx.send(CallEvent::TrackAdded(track));
    }

    /// Mark the call attempt as failed and notify event subscribers.
    pub fn fail(&self, error: &CallError) {
        warn!("Call failed ({}): {}", self.role, error);
        let _ = self.events_tx.send(CallEvent::Failed { reason: error.to_string() });
    }
}

// MARK: - Tests

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use vidalink_core::{MediaConstraints, PeerError, SdpKind, TrackKind};
    use vidalink_signaling::{MemorySignaling, SignalingChannel};

    use super::*;

    /// Scripted peer that records every call in order.
    struct RecordingPeer {
        ops: Mutex<Vec<String>>,
        has_remote: Mutex<bool>,
        reject_candidates: bool,
        events_tx: broadcast::Sender<PeerEvent>,
    }

    impl RecordingPeer {
        fn new() -> Arc<Self> {
            Self::with_rejection(false)
        }

        fn with_rejection(reject_candidates: bool) -> Arc<Self> {
            let (events_tx, _) = broadcast::channel(16);
            Arc::new(Self {
                ops: Mutex::new(Vec::new()),
                has_remote: Mutex::new(false),
                reject_candidates,
                events_tx,
            })
        }

        fn record(&self, op: impl Into<String>) {
            self.ops.lock().unwrap().push(op.into());
        }

        fn ops(&self) -> Vec<String> {
            self.ops.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PeerConnection for RecordingPeer {
        async fn start_media(&self, _constraints: &MediaConstraints) -> Result<(), PeerError> {
            self.record("start_media");
            Ok(())
        }

        async fn create_offer(&self) -> Result<SessionDescription, PeerError> {
            self.record("create_offer");
            Ok(SessionDescription::offer("sdp-offer"))
        }

        async fn create_answer(&self) -> Result<SessionDescription, PeerError> {
            self.record("create_answer");
            Ok(SessionDescription::answer("sdp-answer"))
        }

        async fn set_local_description(&self, desc: SessionDescription) -> Result<(), PeerError> {
            self.record(format!("set_local:{}", desc.kind));
            Ok(())
        }

        async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), PeerError> {
            self.record(format!("set_remote:{}", desc.kind));
            *self.has_remote.lock().unwrap() = true;
            Ok(())
        }

        async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
            if !*self.has_remote.lock().unwrap() {
                return Err(PeerError::CandidateRejected {
                    reason: "no remote description".into(),
                });
            }
            if self.reject_candidates {
                return Err(PeerError::CandidateRejected { reason: "scripted".into() });
            }
            self.record(format!("add:{}", candidate.candidate));
            Ok(())
        }

        fn events(&self) -> broadcast::Receiver<PeerEvent> {
            self.events_tx.subscribe()
        }

        async fn close(&self) -> Result<(), PeerError> {
            self.record("close");
            Ok(())
        }
    }

    async fn session_with(
        role: CallRole,
    ) -> (CallSession, Arc<RecordingPeer>, Arc<MemorySignaling>) {
        let store = Arc::new(MemorySignaling::new());
        let room_id = store.create_room().await.unwrap();
        let peer = RecordingPeer::new();
        let session = CallSession::new(role, room_id, peer.clone(), store.clone());
        (session, peer, store)
    }

    fn offer_event() -> RoomEvent {
        RoomEvent::OfferPublished { offer: SessionDescription::offer("sdp-offer") }
    }

    fn answer_event() -> RoomEvent {
        RoomEvent::AnswerPublished { answer: SessionDescription::answer("sdp-answer") }
    }

    fn candidate_event(role: CallRole, label: &str) -> RoomEvent {
        RoomEvent::CandidateAdded { role, candidate: IceCandidate::new(label) }
    }

    #[tokio::test]
    async fn callee_queues_candidates_until_offer_applied() {
        let (mut session, peer, _store) = session_with(CallRole::Callee).await;
        session.begin_awaiting_remote();

        session.handle_room_event(candidate_event(CallRole::Caller, "c0")).await.unwrap();
        session.handle_room_event(candidate_event(CallRole::Caller, "c1")).await.unwrap();
        assert_eq!(session.pending_candidates(), 2);
        assert!(peer.ops().is_empty());

        session.handle_room_event(offer_event()).await.unwrap();

        assert_eq!(session.state(), NegotiationState::Connected);
        assert_eq!(session.pending_candidates(), 0);
        assert_eq!(
            peer.ops(),
            vec![
                "set_remote:offer",
                "add:c0",
                "add:c1",
                "create_answer",
                "set_local:answer",
            ]
        );
    }

    #[tokio::test]
    async fn callee_publishes_answer_after_applying_offer() {
        let (mut session, _peer, store) = session_with(CallRole::Callee).await;
        let room_id = session.room_id().clone();
        session.begin_awaiting_remote();

        session.handle_room_event(offer_event()).await.unwrap();

        let snapshot = store.fetch_room(&room_id).await.unwrap();
        let answer = snapshot.answer.expect("answer published");
        assert_eq!(answer.kind, SdpKind::Answer);
    }

    #[tokio::test]
    async fn caller_connects_on_first_answer_only() {
        let (mut session, peer, _store) = session_with(CallRole::Caller).await;
        session.begin_awaiting_remote();

        session.handle_room_event(answer_event()).await.unwrap();
        session.handle_room_event(answer_event()).await.unwrap();

        assert_eq!(session.state(), NegotiationState::Connected);
        let set_remotes = peer.ops().iter().filter(|op| op.starts_with("set_remote")).count();
        assert_eq!(set_remotes, 1);
    }

    #[tokio::test]
    async fn candidates_apply_directly_once_connected() {
        let (mut session, peer, _store) = session_with(CallRole::Caller).await;
        session.begin_awaiting_remote();
        session.handle_room_event(answer_event()).await.unwrap();

        session.handle_room_event(candidate_event(CallRole::Callee, "late")).await.unwrap();

        assert_eq!(session.pending_candidates(), 0);
        assert!(peer.ops().contains(&"add:late".to_string()));
    }

    #[tokio::test]
    async fn own_role_events_are_ignored() {
        let (mut session, peer, _store) = session_with(CallRole::Caller).await;
        session.begin_awaiting_remote();

        session.handle_room_event(offer_event()).await.unwrap();
        session.handle_room_event(candidate_event(CallRole::Caller, "own")).await.unwrap();

        assert_eq!(session.state(), NegotiationState::AwaitingRemoteDescription);
        assert_eq!(session.pending_candidates(), 0);
        assert!(peer.ops().is_empty());
    }

    #[tokio::test]
    async fn remote_description_before_awaiting_is_rejected() {
        let (mut session, _peer, _store) = session_with(CallRole::Caller).await;

        let err = session.handle_room_event(answer_event()).await.unwrap_err();
        assert!(matches!(
            err,
            CallError::UnexpectedRemoteDescription { state: NegotiationState::NoConnection }
        ));
    }

    #[tokio::test]
    async fn drain_preserves_arrival_order() {
        let (mut session, peer, _store) = session_with(CallRole::Callee).await;
        session.begin_awaiting_remote();

        for label in ["c0", "c1", "c2", "c3"] {
            session
                .handle_room_event(candidate_event(CallRole::Caller, label))
                .await
                .unwrap();
        }
        session.handle_room_event(offer_event()).await.unwrap();

        let adds: Vec<String> =
            peer.ops().into_iter().filter(|op| op.starts_with("add:")).collect();
        assert_eq!(adds, vec!["add:c0", "add:c1", "add:c2", "add:c3"]);
    }

    #[tokio::test]
    async fn rejected_candidate_does_not_fail_the_call() {
        let store = Arc::new(MemorySignaling::new());
        let room_id = store.create_room().await.unwrap();
        let peer = RecordingPeer::with_rejection(true);
        let mut session =
            CallSession::new(CallRole::Caller, room_id, peer.clone(), store.clone());
        session.begin_awaiting_remote();
        session.handle_room_event(answer_event()).await.unwrap();

        let result = session.handle_room_event(candidate_event(CallRole::Callee, "bad")).await;

        assert!(result.is_ok());
        assert_eq!(session.state(), NegotiationState::Connected);
    }

    #[tokio::test]
    async fn discovered_candidate_lands_in_own_list() {
        let (mut session, _peer, store) = session_with(CallRole::Caller).await;
        let room_id = session.room_id().clone();

        session
            .handle_peer_event(PeerEvent::CandidateDiscovered(IceCandidate::new("local-0")))
            .await
            .unwrap();

        let snapshot = store.fetch_room(&room_id).await.unwrap();
        assert_eq!(snapshot.caller_candidates.len(), 1);
        assert_eq!(snapshot.caller_candidates[0].candidate, "local-0");
        assert!(snapshot.callee_candidates.is_empty());
    }

    #[tokio::test]
    async fn track_added_fans_out_to_call_events() {
        let (mut session, _peer, _store) = session_with(CallRole::Callee).await;
        let mut events = session.subscribe_events();

        let track = RemoteTrack::new("track-1", TrackKind::Video);
        session.handle_peer_event(PeerEvent::TrackAdded(track.clone())).await.unwrap();

        assert_eq!(events.recv().await.unwrap(), CallEvent::TrackAdded(track));
    }

    #[tokio::test]
    async fn state_watch_follows_transitions() {
        let (mut session, _peer, _store) = session_with(CallRole::Caller).await;
        let state_rx = session.state_receiver();
        assert_eq!(*state_rx.borrow(), NegotiationState::NoConnection);

        session.begin_awaiting_remote();
        assert_eq!(*state_rx.borrow(), NegotiationState::AwaitingRemoteDescription);

        session.handle_room_event(answer_event()).await.unwrap();
        assert_eq!(*state_rx.borrow(), NegotiationState::Connected);
    }
}
