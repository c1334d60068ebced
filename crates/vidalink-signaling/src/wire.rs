//! Wire protocol spoken between [`RemoteSignaling`](crate::RemoteSignaling)
//! and the `vidalink-relay` server.
//!
//! Framing: 4-byte big-endian length prefix + JSON body, 1 MiB cap. Requests
//! carry a client-generated `requestID` echoed by the matching `ok`/`error`
//! reply. `subscribe` requests additionally carry a client-generated
//! `subscriptionID`; pushed `event` messages echo that id instead of a
//! request id, so the client can route each push to exactly one stream.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;
use vidalink_core::{CallRole, IceCandidate, RoomSnapshot, SessionDescription};

use crate::channel::RoomEvent;

/// Upper bound for one framed message.
pub const MAX_MESSAGE_BYTES: usize = 1_048_576;

/// Stable error codes carried by `error` replies.
pub const CODE_ROOM_NOT_FOUND: &str = "room_not_found";
pub const CODE_BAD_REQUEST: &str = "bad_request";
pub const CODE_INTERNAL: &str = "internal";

// MARK: - Message types

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    CreateRoom,
    FetchRoom,
    PublishOffer,
    PublishAnswer,
    PublishCandidate,
    Subscribe,
    Ok,
    Error,
    Event,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelayMessage {
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    #[serde(rename = "requestID", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(rename = "roomID", skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(rename = "subscriptionID", skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offer: Option<SessionDescription>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<SessionDescription>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<CallRole>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate: Option<IceCandidate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room: Option<RoomSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<RoomEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl RelayMessage {
    fn base(msg_type: MessageType) -> Self {
        Self {
            msg_type,
            request_id: None,
            room_id: None,
            subscription_id: None,
            offer: None,
            answer: None,
            role: None,
            candidate: None,
            room: None,
            event: None,
            code: None,
            reason: None,
        }
    }

    // ── Requests ─────────────────────────────────────────────────────────────

    pub fn create_room(request_id: &str) -> Self {
        Self {
            request_id: Some(request_id.to_owned()),
            ..Self::base(MessageType::CreateRoom)
        }
    }

    pub fn fetch_room(request_id: &str, room_id: &str) -> Self {
        Self {
            request_id: Some(request_id.to_owned()),
            room_id: Some(room_id.to_owned()),
            ..Self::base(MessageType::FetchRoom)
        }
    }

    pub fn publish_offer(request_id: &str, room_id: &str, offer: SessionDescription) -> Self {
        Self {
            request_id: Some(request_id.to_owned()),
            room_id: Some(room_id.to_owned()),
            offer: Some(offer),
            ..Self::base(MessageType::PublishOffer)
        }
    }

    pub fn publish_answer(request_id: &str, room_id: &str, answer: SessionDescription) -> Self {
        Self {
            request_id: Some(request_id.to_owned()),
            room_id: Some(room_id.to_owned()),
            answer: Some(answer),
            ..Self::base(MessageType::PublishAnswer)
        }
    }

    pub fn publish_candidate(
        request_id: &str,
        room_id: &str,
        role: CallRole,
        candidate: IceCandidate,
    ) -> Self {
        Self {
            request_id: Some(request_id.to_owned()),
            room_id: Some(room_id.to_owned()),
            role: Some(role),
            candidate: Some(candidate),
            ..Self::base(MessageType::PublishCandidate)
        }
    }

    pub fn subscribe(request_id: &str, room_id: &str, subscription_id: &str) -> Self {
        Self {
            request_id: Some(request_id.to_owned()),
            room_id: Some(room_id.to_owned()),
            subscription_id: Some(subscription_id.to_owned()),
            ..Self::base(MessageType::Subscribe)
        }
    }

    // ── Replies ──────────────────────────────────────────────────────────────

    pub fn ok(request_id: &str) -> Self {
        Self {
            request_id: Some(request_id.to_owned()),
            ..Self::base(MessageType::Ok)
        }
    }

    pub fn room_created(request_id: &str, room_id: &str) -> Self {
        Self {
            room_id: Some(room_id.to_owned()),
            ..Self::ok(request_id)
        }
    }

    pub fn room_fetched(request_id: &str, room: RoomSnapshot) -> Self {
        Self {
            room: Some(room),
            ..Self::ok(request_id)
        }
    }

    pub fn error(request_id: &str, code: &str, reason: impl Into<String>) -> Self {
        Self {
            request_id: Some(request_id.to_owned()),
            code: Some(code.to_owned()),
            reason: Some(reason.into()),
            ..Self::base(MessageType::Error)
        }
    }

    // ── Pushed events ────────────────────────────────────────────────────────

    pub fn event(room_id: &str, subscription_id: &str, event: RoomEvent) -> Self {
        Self {
            room_id: Some(room_id.to_owned()),
            subscription_id: Some(subscription_id.to_owned()),
            event: Some(event),
            ..Self::base(MessageType::Event)
        }
    }
}

// MARK: - Length-prefixed framing

pub async fn write_msg(
    stream: &mut (impl AsyncWriteExt + Unpin),
    msg: &RelayMessage,
) -> anyhow::Result<()> {
    let json = serde_json::to_vec(msg)?;
    let len = json.len() as u32;
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(&json).await?;
    stream.flush().await?;
    debug!("Sent {:?} ({} bytes)", msg.msg_type, json.len());
    Ok(())
}

pub async fn read_msg(
    stream: &mut (impl AsyncReadExt + Unpin),
) -> anyhow::Result<RelayMessage> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await.context("reading message length")?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_BYTES {
        anyhow::bail!("Message too large: {} bytes", len);
    }
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await.context("reading message body")?;
    let msg: RelayMessage = serde_json::from_slice(&body).context("parsing relay message")?;
    debug!("Received {:?} ({} bytes)", msg.msg_type, len);
    Ok(msg)
}

// MARK: - Tests

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_types_are_snake_case() {
        let json = serde_json::to_value(MessageType::CreateRoom).unwrap();
        assert_eq!(json, "create_room");
        let json = serde_json::to_value(MessageType::PublishCandidate).unwrap();
        assert_eq!(json, "publish_candidate");
    }

    #[test]
    fn requests_omit_absent_fields() {
        let msg = RelayMessage::create_room("req-1");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"create_room""#));
        assert!(json.contains(r#""requestID":"req-1""#));
        assert!(!json.contains("offer"));
        assert!(!json.contains("candidate"));
    }

    #[test]
    fn event_payload_is_tagged() {
        let msg = RelayMessage::event(
            "room-1",
            "sub-1",
            RoomEvent::CandidateAdded {
                role: CallRole::Callee,
                candidate: IceCandidate::new("c0"),
            },
        );
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["roomID"], "room-1");
        assert_eq!(json["subscriptionID"], "sub-1");
        assert_eq!(json["event"]["kind"], "candidate_added");
        assert_eq!(json["event"]["role"], "callee");
    }

    #[tokio::test]
    async fn framing_roundtrip() {
        let (mut a, mut b) = tokio::io::duplex(4096);

        let sent = RelayMessage::publish_offer(
            "req-2",
            "room-7",
            SessionDescription::offer("v=0"),
        );
        write_msg(&mut a, &sent).await.unwrap();

        let got = read_msg(&mut b).await.unwrap();
        assert_eq!(got.msg_type, MessageType::PublishOffer);
        assert_eq!(got.request_id.as_deref(), Some("req-2"));
        assert_eq!(got.room_id.as_deref(), Some("room-7"));
        assert_eq!(got.offer, Some(SessionDescription::offer("v=0")));
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);

        let len = (MAX_MESSAGE_BYTES as u32 + 1).to_be_bytes();
        a.write_all(&len).await.unwrap();

        let err = read_msg(&mut b).await.unwrap_err();
        assert!(err.to_string().contains("too large"));
    }
}
