//! Accept loop, per-connection plumbing, and request dispatch.
//!
//! Per connection:
//! - a read loop (the connection task) parsing framed requests,
//! - a writer task draining one outbound queue, so replies and pushed events
//!   leave in a single serialized stream,
//! - one forwarder task per subscription, moving store events onto the
//!   outbound queue.
//!
//! Subscriptions die with their connection; the rooms themselves live for
//! the process lifetime.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};
use vidalink_core::{RelayConfig, RoomId, SignalingError};
use vidalink_signaling::wire::{
    read_msg, write_msg, MessageType, RelayMessage, CODE_BAD_REQUEST, CODE_INTERNAL,
    CODE_ROOM_NOT_FOUND,
};
use vidalink_signaling::{MemorySignaling, SignalingChannel};

use crate::tls;

type TlsServerStream = tokio_rustls::server::TlsStream<TcpStream>;

// MARK: - Accept loop

/// Bind `config.listen_addr()` and serve until the task is cancelled.
pub async fn serve(config: RelayConfig) -> anyhow::Result<()> {
    let listener = TcpListener::bind(config.listen_addr())
        .await
        .with_context(|| format!("binding {}", config.listen_addr()))?;
    serve_on(listener, config).await
}

/// Serve on an already bound listener (tests bind `127.0.0.1:0` first and
/// read the port back).
pub async fn serve_on(listener: TcpListener, config: RelayConfig) -> anyhow::Result<()> {
    let acceptor = TlsAcceptor::from(tls::server_config(&config)?);
    let store: Arc<dyn SignalingChannel> = Arc::new(MemorySignaling::new());
    info!("Relay listening on {}", listener.local_addr()?);

    loop {
        let (tcp, peer_addr) = listener.accept().await?;
        let acceptor = acceptor.clone();
        let store = store.clone();
        tokio::spawn(handle_connection(acceptor, tcp, peer_addr, store));
    }
}

// MARK: - Connection plumbing

async fn handle_connection(
    acceptor: TlsAcceptor,
    tcp: TcpStream,
    peer_addr: SocketAddr,
    store: Arc<dyn SignalingChannel>,
) {
    if let Err(e) = tcp.set_nodelay(true) {
        warn!("set_nodelay failed for {}: {}", peer_addr, e);
    }
    let tls = match acceptor.accept(tcp).await {
        Ok(tls) => tls,
        Err(e) => {
            warn!("TLS accept failed for {}: {}", peer_addr, e);
            return;
        }
    };
    info!("Client connected: {}", peer_addr);

    let (read_half, write_half) = tokio::io::split(tls);
    let (out_tx, out_rx) = mpsc::unbounded_channel::<RelayMessage>();
    let writer = tokio::spawn(write_loop(write_half, out_rx));

    read_loop(read_half, out_tx, store).await;

    // All outbound senders are gone now, so the writer drains and exits.
    let _ = writer.await;
    info!("Client disconnected: {}", peer_addr);
}

async fn read_loop(
    mut reader: ReadHalf<TlsServerStream>,
    out_tx: mpsc::UnboundedSender<RelayMessage>,
    store: Arc<dyn SignalingChannel>,
) {
    let mut forwarders: Vec<JoinHandle<()>> = Vec::new();
    loop {
        let msg = match read_msg(&mut reader).await {
            Ok(msg) => msg,
            Err(e) => {
                debug!("Read loop ended: {:#}", e);
                break;
            }
        };
        if let Some(reply) = dispatch(&store, &out_tx, &mut forwarders, msg).await {
            if out_tx.send(reply).is_err() {
                break;
            }
        }
    }
    for forwarder in forwarders {
        forwarder.abort();
    }
}

async fn write_loop(
    mut writer: WriteHalf<TlsServerStream>,
    mut out_rx: mpsc::UnboundedReceiver<RelayMessage>,
) {
    while let Some(msg) = out_rx.recv().await {
        if let Err(e) = write_msg(&mut writer, &msg).await {
            debug!("Write loop ended: {:#}", e);
            return;
        }
    }
    let _ = writer.shutdown().await;
}

// MARK: - Dispatch

/// Handle one client request against the store. `None` means the message was
/// dropped without a reply (no way to correlate one).
async fn dispatch(
    store: &Arc<dyn SignalingChannel>,
    out_tx: &mpsc::UnboundedSender<RelayMessage>,
    forwarders: &mut Vec<JoinHandle<()>>,
    msg: RelayMessage,
) -> Option<RelayMessage> {
    let request_id = match msg.request_id.clone() {
        Some(id) => id,
        None => {
            warn!("Dropping {:?} request without requestID", msg.msg_type);
            return None;
        }
    };

    let reply = match msg.msg_type {
        MessageType::CreateRoom => handle_create(store, &request_id).await,
        MessageType::FetchRoom => handle_fetch(store, &request_id, &msg).await,
        MessageType::PublishOffer => handle_publish_offer(store, &request_id, &msg).await,
        MessageType::PublishAnswer => handle_publish_answer(store, &request_id, &msg).await,
        MessageType::PublishCandidate => {
            handle_publish_candidate(store, &request_id, &msg).await
        }
        MessageType::Subscribe => {
            handle_subscribe(store, out_tx, forwarders, &request_id, &msg).await
        }
        other => {
            warn!("Unexpected {:?} from client", other);
            RelayMessage::error(&request_id, CODE_BAD_REQUEST, format!("unexpected {:?}", other))
        }
    };
    Some(reply)
}

async fn handle_create(store: &Arc<dyn SignalingChannel>, request_id: &str) -> RelayMessage {
    match store.create_room().await {
        Ok(room_id) => {
            info!("Room created: {}", room_id);
            RelayMessage::room_created(request_id, room_id.as_str())
        }
        Err(e) => error_reply(request_id, &e),
    }
}

async fn handle_fetch(
    store: &Arc<dyn SignalingChannel>,
    request_id: &str,
    msg: &RelayMessage,
) -> RelayMessage {
    let room_id = match room_id_of(msg) {
        Some(id) => id,
        None => return missing_field(request_id, "roomID"),
    };
    match store.fetch_room(&room_id).await {
        Ok(snapshot) => RelayMessage::room_fetched(request_id, snapshot),
        Err(e) => error_reply(request_id, &e),
    }
}

async fn handle_publish_offer(
    store: &Arc<dyn SignalingChannel>,
    request_id: &str,
    msg: &RelayMessage,
) -> RelayMessage {
    let room_id = match room_id_of(msg) {
        Some(id) => id,
        None => return missing_field(request_id, "roomID"),
    };
    let offer = match msg.offer.clone() {
        Some(offer) => offer,
        None => return missing_field(request_id, "offer"),
    };
    match store.publish_offer(&room_id, offer).await {
        Ok(()) => RelayMessage::ok(request_id),
        Err(e) => error_reply(request_id, &e),
    }
}

async fn handle_publish_answer(
    store: &Arc<dyn SignalingChannel>,
    request_id: &str,
    msg: &RelayMessage,
) -> RelayMessage {
    let room_id = match room_id_of(msg) {
        Some(id) => id,
        None => return missing_field(request_id, "roomID"),
    };
    let answer = match msg.answer.clone() {
        Some(answer) => answer,
        None => return missing_field(request_id, "answer"),
    };
    match store.publish_answer(&room_id, answer).await {
        Ok(()) => RelayMessage::ok(request_id),
        Err(e) => error_reply(request_id, &e),
    }
}

async fn handle_publish_candidate(
    store: &Arc<dyn SignalingChannel>,
    request_id: &str,
    msg: &RelayMessage,
) -> RelayMessage {
    let room_id = match room_id_of(msg) {
        Some(id) => id,
        None => return missing_field(request_id, "roomID"),
    };
    let role = match msg.role {
        Some(role) => role,
        None => return missing_field(request_id, "role"),
    };
    let candidate = match msg.candidate.clone() {
        Some(candidate) => candidate,
        None => return missing_field(request_id, "candidate"),
    };
    match store.publish_candidate(&room_id, role, candidate).await {
        Ok(()) => RelayMessage::ok(request_id),
        Err(e) => error_reply(request_id, &e),
    }
}

async fn handle_subscribe(
    store: &Arc<dyn SignalingChannel>,
    out_tx: &mpsc::UnboundedSender<RelayMessage>,
    forwarders: &mut Vec<JoinHandle<()>>,
    request_id: &str,
    msg: &RelayMessage,
) -> RelayMessage {
    let room_id = match room_id_of(msg) {
        Some(id) => id,
        None => return missing_field(request_id, "roomID"),
    };
    // The client tags each subscription; every push echoes the tag so the
    // client can route it to the right stream.
    let subscription_id = match msg.subscription_id.clone() {
        Some(id) => id,
        None => return missing_field(request_id, "subscriptionID"),
    };
    match store.subscribe(&room_id).await {
        Ok(mut events) => {
            let out_tx = out_tx.clone();
            let wire_room = room_id.as_str().to_owned();
            forwarders.push(tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    let push = RelayMessage::event(&wire_room, &subscription_id, event);
                    if out_tx.send(push).is_err() {
                        break;
                    }
                }
            }));
            debug!("Subscription started for room {}", room_id);
            RelayMessage::ok(request_id)
        }
        Err(e) => error_reply(request_id, &e),
    }
}

fn room_id_of(msg: &RelayMessage) -> Option<RoomId> {
    msg.room_id.as_deref().map(RoomId::from)
}

fn error_reply(request_id: &str, err: &SignalingError) -> RelayMessage {
    let code = match err {
        SignalingError::RoomNotFound { .. } => CODE_ROOM_NOT_FOUND,
        _ => CODE_INTERNAL,
    };
    RelayMessage::error(request_id, code, err.to_string())
}

fn missing_field(request_id: &str, field: &str) -> RelayMessage {
    RelayMessage::error(request_id, CODE_BAD_REQUEST, format!("missing {}", field))
}

// MARK: - Tests
