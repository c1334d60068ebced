//! Call establishment flows and the [`ActiveCall`] handle.
//!
//! # Lifecycle
//!
//! ```text
//! caller: create_room(store, peer, config) ──► ActiveCall
//! callee: join_room(store, peer, room_id, config) ──► ActiveCall
//!            │
//!            ├─ wait_connected()   resolves once negotiation reaches Connected
//!            ├─ next_event()       TrackAdded / Failed
//!            └─ hang_up()          close the peer, stop the event pump
//! ```
//!
//! Each call runs one event-pump task: every room event and peer event for
//! the session is processed there, in order, so candidate queueing and the
//! transition drain never interleave and the session needs no locks.
//!
//! Of [`CallConfig`] the flows read only `media`; `rtc` is consumed by the
//! peer-connection constructor whose output is passed in as `peer`.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vidalink_core::{CallConfig, CallError, CallRole, NegotiationState, RoomId};
use vidalink_peer::{PeerConnection, PeerEvent};
use vidalink_signaling::{RoomEvents, SignalingChannel};

use crate::session::{CallEvent, CallSession};

// MARK: - Caller flow

/// Start a call as the room initiator.
///
/// Acquires local media per `config.media`, creates a fresh room, publishes
/// the offer, and returns a handle to the call while the answer and remote
/// candidates are still on their way. Media failure aborts before anything
/// is written.
pub async fn create_room(
    signaling: Arc<dyn SignalingChannel>,
    peer: Arc<dyn PeerConnection>,
    config: &CallConfig,
) -> Result<ActiveCall, CallError> {
    peer.start_media(&config.media).await?;

    let room_id = signaling.create_room().await?;
    info!("Created room {}", room_id);

    let mut session =
        CallSession::new(CallRole::Caller, room_id.clone(), peer.clone(), signaling.clone());

    // Subscribe to both event sources before publishing anything so nothing
    // can be missed.
    let room_events = signaling.subscribe(&room_id).await?;
    let peer_events = peer.events();

    let offer = peer.create_offer().await?;
    peer.set_local_description(offer.clone()).await?;
    signaling.publish_offer(&room_id, offer).await?;
    session.begin_awaiting_remote();
    info!("Published offer for room {}; awaiting answer", room_id);

    Ok(ActiveCall::spawn(session, room_events, peer_events))
}

// MARK: - Callee flow

/// Join an existing room as the callee.
///
/// The room lookup comes first: joining an unknown identifier fails with
/// `RoomNotFound` before media is acquired and without writing anything.
/// The offer is taken from the subscription replay when already published,
/// otherwise the session waits for it (indefinitely; there are no timeouts
/// in the negotiation path).
pub async fn join_room(
    signaling: Arc<dyn SignalingChannel>,
    peer: Arc<dyn PeerConnection>,
    room_id: RoomId,
    config: &CallConfig,
) -> Result<ActiveCall, CallError> {
    let snapshot = signaling.fetch_room(&room_id).await?;
    debug!(
        "Room {} found (offer present: {}, {} caller candidate(s))",
        room_id,
        snapshot.offer.is_some(),
        snapshot.caller_candidates.len()
    );

    peer.start_media(&config.media).await?;

    let mut session =
        CallSession::new(CallRole::Callee, room_id.clone(), peer.clone(), signaling.clone());

    let room_events = signaling.subscribe(&room_id).await?;
    let peer_events = peer.events();
    session.begin_awaiting_remote();
    info!("Joined room {}; awaiting offer", room_id);

    Ok(ActiveCall::spawn(session, room_events, peer_events))
}

// MARK: - ActiveCall

/// Owner-facing handle to a call being established or already connected.
///
/// Dropping the handle stops the event pump without closing the peer
/// connection; call [`hang_up`](ActiveCall::hang_up) for an orderly shutdown.
pub struct ActiveCall {
    room_id: RoomId,
    role: CallRole,
    peer: Arc<dyn PeerConnection>,
    state_rx: watch::Receiver<NegotiationState>,
    events_tx: broadcast::Sender<CallEvent>,
    events_rx: broadcast::Receiver<CallEvent>,
    hangup_tx: Option<oneshot::Sender<()>>,
    pump: JoinHandle<()>,
}

impl ActiveCall {
    fn spawn(
        session: CallSession,
        room_events: RoomEvents,
        peer_events: broadcast::Receiver<PeerEvent>,
    ) -> Self {
        let room_id = session.room_id().clone();
        let role = session.role();
        let peer = session.peer();
        let state_rx = session.state_receiver();
        let events_tx = session.events_sender();
        let events_rx = session.subscribe_events();
        let (hangup_tx, hangup_rx) = oneshot::channel();

        let pump = tokio::spawn(run_pump(session, room_events, peer_events, hangup_rx));

        Self {
            room_id,
            role,
            peer,
            state_rx,
            events_tx,
            events_rx,
            hangup_tx: Some(hangup_tx),
            pump,
        }
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn role(&self) -> CallRole {
        self.role
    }

    /// Current negotiation state.
    pub fn state(&self) -> NegotiationState {
        *self.state_rx.borrow()
    }

    /// Resolve once the session reaches `Connected`.
    ///
    /// Fails if the pump stops before that (terminal call failure).
    pub async fn wait_connected(&mut self) -> Result<(), CallError> {
        self.state_rx
            .wait_for(|state| state.is_connected())
            .await
            .map(|_| ())
            .map_err(|_| CallError::EventsClosed)
    }

    /// Next call event, in emission order from the start of the call.
    /// `None` once the pump has stopped and the buffer is drained.
    pub async fn next_event(&mut self) -> Option<CallEvent> {
        loop {
            match self.events_rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Call event stream lagged by {}", n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Additional event receiver, seeing events emitted from now on.
    pub fn events(&self) -> broadcast::Receiver<CallEvent> {
        self.events_tx.subscribe()
    }

    /// End the call: stop the event pump and close the peer connection.
    ///
    /// Local shutdown only; the room record is never deleted and its
    /// candidate lists stay append-only.
    pub async fn hang_up(mut self) -> Result<(), CallError> {
        info!("Hanging up call in room {}", self.room_id);
        if let Some(tx) = self.hangup_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.pump.await;
        self.peer.close().await?;
        Ok(())
    }
}

impl fmt::Debug for ActiveCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveCall")
            .field("room_id", &self.room_id)
            .field("role", &self.role)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// MARK: - Event pump

/// Single driver task for one call session.
async fn run_pump(
    mut session: CallSession,
    mut room_events: RoomEvents,
    mut peer_events: broadcast::Receiver<PeerEvent>,
    mut hangup_rx: oneshot::Receiver<()>,
) {
    let reason: &'static str = loop {
        tokio::select! {
            maybe_event = room_events.recv() => match maybe_event {
                Some(event) => {
                    if let Err(e) = session.handle_room_event(event).await {
                        session.fail(&e);
                        break "session error";
                    }
                }
                None => {
                    if session.state().is_connected() {
                        // Media already runs peer-to-peer; only late trickle
                        // is lost with the subscription.
                        break "signaling stream ended";
                    }
                    session.fail(&CallError::EventsClosed);
                    break "signaling stream ended early";
                }
            },
            result = peer_events.recv() => match result {
                Ok(event) => {
                    if let Err(e) = session.handle_peer_event(event).await {
                        session.fail(&e);
                        break "session error";
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Peer event stream lagged by {}", n);
                }
                Err(broadcast::error::RecvError::Closed) => break "peer event stream closed",
            },
            _ = &mut hangup_rx => break "hang up",
        }
    };
    info!("Call event pump stopped for room {} ({})", session.room_id(), reason);
}
