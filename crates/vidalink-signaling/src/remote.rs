//! TLS TCP signaling client against a `vidalink-relay` server.
//!
//! # Lifecycle
//!
//! ```text
//! 1. RemoteSignaling::connect(host, port)
//!       └─ TLS handshake (self-signed relay cert, TOFU), spawns recv loop
//! 2. channel.create_room() / fetch_room() / publish_*()
//!       └─ request + matching ok/error reply, correlated by requestID
//! 3. channel.subscribe(room_id)
//!       └─ server replays the room record, then pushes live events
//! ```
//!
//! One connection multiplexes any number of in-flight requests and room
//! subscriptions. Replies are matched to callers through a pending-request
//! map keyed by `requestID`; pushed `event` messages carry the
//! `subscriptionID` of the subscription they belong to and are routed to
//! exactly that stream, so two subscriptions to the same room never see
//! each other's replay or duplicated live events.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tokio::io::WriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;
use vidalink_core::{
    CallRole, IceCandidate, RoomId, RoomSnapshot, SessionDescription, SignalingError,
};

use crate::channel::{RoomEvent, RoomEvents, SignalingChannel};
use crate::wire::{read_msg, write_msg, MessageType, RelayMessage, CODE_ROOM_NOT_FOUND};

// ── Internal aliases ──────────────────────────────────────────────────────────

type TlsClientStream = tokio_rustls::client::TlsStream<TcpStream>;
type PendingMap = Mutex<HashMap<String, oneshot::Sender<RelayMessage>>>;
type SubscriberMap = Mutex<HashMap<String, mpsc::UnboundedSender<RoomEvent>>>;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ── TOFU certificate verifier (accepts any self-signed cert) ─────────────────

#[derive(Debug)]
struct TofuCertVerifier;

impl rustls::client::danger::ServerCertVerifier for TofuCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        // TOFU: accept any self-signed certificate.
        // Production: pin the SHA-256 fingerprint on first connect.
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

// ── RemoteSignaling ───────────────────────────────────────────────────────────

/// [`SignalingChannel`] backed by a TLS connection to a relay server.
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
pub struct RemoteSignaling {
    writer: tokio::sync::Mutex<WriteHalf<TlsClientStream>>,
    pending: Arc<PendingMap>,
    subscribers: Arc<SubscriberMap>,
    request_timeout: Duration,
}

impl RemoteSignaling {
    // ── Construction ─────────────────────────────────────────────────────────

    /// Connect to a relay at `host:port` and spawn the background receive loop.
    pub async fn connect(host: &str, port: u16) -> anyhow::Result<Self> {
        // Install ring crypto provider (ignored if already installed)
        let _ = rustls::crypto::ring::default_provider().install_default();

        let client_config = rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(TofuCertVerifier))
            .with_no_client_auth();

        let connector = tokio_rustls::TlsConnector::from(Arc::new(client_config));

        let tcp = TcpStream::connect((host, port))
            .await
            .with_context(|| format!("TCP connect to {}:{}", host, port))?;
        tcp.set_nodelay(true)?;

        // Build a ServerName for SNI/handshake.  IP addresses and DNS names
        // are both handled; the cert is accepted regardless (TOFU).
        let server_name: rustls::pki_types::ServerName =
            if let Ok(ip) = host.parse::<std::net::IpAddr>() {
                rustls::pki_types::ServerName::IpAddress(ip.into())
            } else {
                rustls::pki_types::ServerName::try_from(host.to_owned())
                    .map_err(|_| anyhow::anyhow!("Invalid hostname: {}", host))?
            };

        let tls = connector
            .connect(server_name, tcp)
            .await
            .with_context(|| format!("TLS handshake with {}:{}", host, port))?;

        info!("Signaling relay connected at {}:{}", host, port);

        let (read_half, write_half) = tokio::io::split(tls);
        let pending: Arc<PendingMap> = Arc::new(Mutex::new(HashMap::new()));
        let subscribers: Arc<SubscriberMap> = Arc::new(Mutex::new(HashMap::new()));

        tokio::spawn(recv_loop(
            read_half,
            Arc::clone(&pending),
            Arc::clone(&subscribers),
        ));

        Ok(Self {
            writer: tokio::sync::Mutex::new(write_half),
            pending,
            subscribers,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    /// Override the per-request reply timeout (default 10 s).
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    // ── Request / reply ──────────────────────────────────────────────────────

    /// Send one request and wait for its `ok` / `error` reply.
    async fn request(&self, msg: RelayMessage) -> Result<RelayMessage, SignalingError> {
        let request_id = msg.request_id.clone().ok_or_else(|| SignalingError::Protocol {
            reason: "request without requestID".into(),
        })?;
        let room_id = msg.room_id.clone();

        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(request_id.clone(), tx);

        {
            let mut writer = self.writer.lock().await;
            if let Err(e) = write_msg(&mut *writer, &msg).await {
                self.pending.lock().unwrap().remove(&request_id);
                return Err(SignalingError::SendFailed { reason: format!("{:#}", e) });
            }
        }

        let reply = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            // The recv loop dropped our sender: connection is gone.
            Ok(Err(_)) => return Err(SignalingError::ConnectionClosed),
            Err(_) => {
                self.pending.lock().unwrap().remove(&request_id);
                return Err(SignalingError::Timeout {
                    ms: self.request_timeout.as_millis() as u64,
                });
            }
        };

        match reply.msg_type {
            MessageType::Ok => Ok(reply),
            MessageType::Error => Err(map_error(reply, room_id)),
            other => Err(SignalingError::Protocol {
                reason: format!("unexpected {:?} reply", other),
            }),
        }
    }
}

fn next_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Translate an `error` reply into the matching [`SignalingError`].
fn map_error(reply: RelayMessage, request_room_id: Option<String>) -> SignalingError {
    match reply.code.as_deref() {
        Some(CODE_ROOM_NOT_FOUND) => SignalingError::RoomNotFound {
            room_id: reply.room_id.or(request_room_id).unwrap_or_default(),
        },
        _ => SignalingError::Protocol {
            reason: reply.reason.unwrap_or_else(|| "unknown relay error".into()),
        },
    }
}

// ── Background receive loop ───────────────────────────────────────────────────

async fn recv_loop(
    mut reader: tokio::io::ReadHalf<TlsClientStream>,
    pending: Arc<PendingMap>,
    subscribers: Arc<SubscriberMap>,
) {
    loop {
        match read_msg(&mut reader).await {
            Ok(msg) => match msg.msg_type {
                MessageType::Event => deliver_event(&subscribers, msg),
                MessageType::Ok | MessageType::Error => complete_request(&pending, msg),
                other => debug!("Recv loop: ignoring unexpected {:?}", other),
            },
            Err(e) => {
                warn!("Relay receive error: {:#}", e);
                fail_pending(&pending);
                // Dropping the senders ends every live subscription stream.
                subscribers.lock().unwrap().clear();
                return;
            }
        }
    }
}

/// Route a pushed `event` message to the single subscription it is tagged for.
fn deliver_event(subscribers: &SubscriberMap, msg: RelayMessage) {
    let (subscription_id, event) = match (msg.subscription_id, msg.event) {
        (Some(subscription_id), Some(event)) => (subscription_id, event),
        _ => {
            debug!("Dropping malformed event from relay");
            return;
        }
    };
    let mut subs = subscribers.lock().unwrap();
    if let Some(tx) = subs.get(&subscription_id) {
        if tx.send(event).is_err() {
            // Receiver dropped; forget the subscription.
            subs.remove(&subscription_id);
        }
    }
}

/// Resolve the pending request matching a reply's `requestID`.
fn complete_request(pending: &PendingMap, msg: RelayMessage) {
    let request_id = match msg.request_id.clone() {
        Some(id) => id,
        None => {
            debug!("Dropping {:?} reply without requestID", msg.msg_type);
            return;
        }
    };
    match pending.lock().unwrap().remove(&request_id) {
        Some(tx) => {
            let _ = tx.send(msg);
        }
        None => debug!("No pending request for reply {}", request_id),
    }
}

/// Drop all pending-request senders so waiters observe `ConnectionClosed`.
fn fail_pending(pending: &PendingMap) {
    let mut map = pending.lock().unwrap();
    if !map.is_empty() {
        debug!("Dropping {} pending request(s) after connection loss", map.len());
    }
    map.clear();
}

// ── SignalingChannel impl ─────────────────────────────────────────────────────

#[async_trait]
impl SignalingChannel for RemoteSignaling {
    async fn create_room(&self) -> Result<RoomId, SignalingError> {
        let reply = self.request(RelayMessage::create_room(&next_request_id())).await?;
        let room_id = reply.room_id.ok_or_else(|| SignalingError::Protocol {
            reason: "create_room reply without roomID".into(),
        })?;
        Ok(RoomId::new(room_id))
    }

    async fn fetch_room(&self, room_id: &RoomId) -> Result<RoomSnapshot, SignalingError> {
        let reply = self
            .request(RelayMessage::fetch_room(&next_request_id(), room_id.as_str()))
            .await?;
        reply.room.ok_or_else(|| SignalingError::Protocol {
            reason: "fetch_room reply without room".into(),
        })
    }

    async fn publish_offer(
        &self,
        room_id: &RoomId,
        offer: SessionDescription,
    ) -> Result<(), SignalingError> {
        self.request(RelayMessage::publish_offer(
            &next_request_id(),
            room_id.as_str(),
            offer,
        ))
        .await?;
        Ok(())
    }

    async fn publish_answer(
        &self,
        room_id: &RoomId,
        answer: SessionDescription,
    ) -> Result<(), SignalingError> {
        self.request(RelayMessage::publish_answer(
            &next_request_id(),
            room_id.as_str(),
            answer,
        ))
        .await?;
        Ok(())
    }

    async fn publish_candidate(
        &self,
        room_id: &RoomId,
        role: CallRole,
        candidate: IceCandidate,
    ) -> Result<(), SignalingError> {
        self.request(RelayMessage::publish_candidate(
            &next_request_id(),
            room_id.as_str(),
            role,
            candidate,
        ))
        .await?;
        Ok(())
    }

    async fn subscribe(&self, room_id: &RoomId) -> Result<RoomEvents, SignalingError> {
        let subscription_id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::unbounded_channel();

        // Register before the request goes out: the server starts pushing
        // replay events ahead of the ok reply.
        self.subscribers
            .lock()
            .unwrap()
            .insert(subscription_id.clone(), tx);

        if let Err(e) = self
            .request(RelayMessage::subscribe(
                &next_request_id(),
                room_id.as_str(),
                &subscription_id,
            ))
            .await
        {
            self.subscribers.lock().unwrap().remove(&subscription_id);
            return Err(e);
        }

        Ok(RoomEvents::new(rx))
    }
}

// MARK: - Tests

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_request_resolves_waiter() {
        let pending: PendingMap = Mutex::new(HashMap::new());
        let (tx, mut rx) = oneshot::channel();
        pending.lock().unwrap().insert("req-1".into(), tx);

        complete_request(&pending, RelayMessage::ok("req-1"));

        let reply = rx.try_recv().unwrap();
        assert_eq!(reply.msg_type, MessageType::Ok);
        assert!(pending.lock().unwrap().is_empty());
    }

    #[test]
    fn complete_request_ignores_unknown_id() {
        let pending: PendingMap = Mutex::new(HashMap::new());
        let (tx, _rx) = oneshot::channel();
        pending.lock().unwrap().insert("req-1".into(), tx);

        complete_request(&pending, RelayMessage::ok("req-2"));

        assert_eq!(pending.lock().unwrap().len(), 1);
    }

    #[test]
    fn deliver_event_routes_by_subscription_and_prunes_closed() {
        let subscribers: SubscriberMap = Mutex::new(HashMap::new());
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        subscribers.lock().unwrap().insert("sub-a".into(), tx_a);
        subscribers.lock().unwrap().insert("sub-b".into(), tx_b);
        drop(rx_b);

        let event = RoomEvent::CandidateAdded {
            role: CallRole::Caller,
            candidate: IceCandidate::new("c0"),
        };
        // Both subscriptions watch the same room; each push names one of them.
        deliver_event(&subscribers, RelayMessage::event("room-1", "sub-a", event.clone()));
        deliver_event(&subscribers, RelayMessage::event("room-1", "sub-b", event.clone()));

        assert_eq!(rx_a.try_recv().unwrap(), event);
        assert!(rx_a.try_recv().is_err());
        let subs = subscribers.lock().unwrap();
        assert!(subs.contains_key("sub-a"));
        assert!(!subs.contains_key("sub-b"));
    }

    #[test]
    fn map_error_translates_room_not_found() {
        let reply = RelayMessage::error("req-1", CODE_ROOM_NOT_FOUND, "Room not found");
        let err = map_error(reply, Some("room-9".into()));
        match err {
            SignalingError::RoomNotFound { room_id } => assert_eq!(room_id, "room-9"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn map_error_falls_back_to_protocol() {
        let reply = RelayMessage::error("req-1", "bad_request", "missing roomID");
        let err = map_error(reply, None);
        assert!(matches!(err, SignalingError::Protocol { .. }));
    }

    #[test]
    fn fail_pending_drops_all_waiters() {
        let pending: PendingMap = Mutex::new(HashMap::new());
        let (tx, mut rx) = oneshot::channel();
        pending.lock().unwrap().insert("req-1".into(), tx);

        fail_pending(&pending);

        assert!(rx.try_recv().is_err());
        assert!(pending.lock().unwrap().is_empty());
    }
}
