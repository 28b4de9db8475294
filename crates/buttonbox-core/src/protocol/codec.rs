//! JSON codec for encoding and decoding ButtonBox wire packets.
//!
//! Wire format: one JSON object per UDP datagram.
//!
//! ```json
//! { "type": "CMD", "clientId": "c1", "sequence": 5, "payload": { ... } }
//! ```
//!
//! Decoding is all-or-nothing: any structural violation (oversized or
//! truncated data, invalid JSON, an unknown type, a missing required field,
//! or a payload that does not match its schema) yields a
//! [`MalformedPacketError`] and never a partially-populated [`Packet`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::packet::{
    Command, Packet, PacketType, ServerIdentity, MAX_DATAGRAM_SIZE,
};

/// Errors produced while decoding (or, in pathological cases, encoding) a
/// wire packet.
#[derive(Debug, Error, PartialEq)]
pub enum MalformedPacketError {
    /// The datagram exceeds [`MAX_DATAGRAM_SIZE`].
    #[error("datagram too large: {len} bytes (limit {MAX_DATAGRAM_SIZE})")]
    Oversized { len: usize },

    /// The bytes are not a valid JSON envelope (includes truncation and
    /// invalid UTF-8).
    #[error("invalid packet JSON: {0}")]
    Syntax(String),

    /// The `type` field is not a recognized packet type.
    #[error("unknown packet type: {0:?}")]
    UnknownType(String),

    /// A field required for this packet type is absent.
    #[error("{packet_type} packet missing required field `{field}`")]
    MissingField {
        packet_type: PacketType,
        field: &'static str,
    },

    /// The payload is present but does not match the expected schema.
    #[error("malformed {packet_type} payload: {detail}")]
    InvalidPayload {
        packet_type: PacketType,
        detail: String,
    },
}

/// The raw JSON envelope shared by every packet type.
///
/// Field order here fixes the byte order of encoded packets, so the same
/// logical packet always serializes to identical bytes.
#[derive(Debug, Serialize, Deserialize)]
struct WireEnvelope {
    #[serde(rename = "type")]
    packet_type: String,
    #[serde(rename = "clientId")]
    client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sequence: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<serde_json::Value>,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`Packet`] into the bytes of one UDP datagram.
///
/// # Errors
///
/// Returns [`MalformedPacketError::Syntax`] only if JSON serialization fails,
/// which cannot happen for a well-formed in-memory packet.
pub fn encode_packet(packet: &Packet) -> Result<Vec<u8>, MalformedPacketError> {
    let envelope = match packet {
        Packet::Cmd {
            client_id,
            sequence,
            command,
        } => WireEnvelope {
            packet_type: PacketType::Cmd.wire_name().to_string(),
            client_id: client_id.clone(),
            sequence: Some(*sequence),
            payload: Some(to_value(command)?),
        },
        Packet::Ack {
            client_id,
            sequence,
        } => WireEnvelope {
            packet_type: PacketType::Ack.wire_name().to_string(),
            client_id: client_id.clone(),
            sequence: Some(*sequence),
            payload: None,
        },
        Packet::Ping {
            client_id,
            sequence,
        } => WireEnvelope {
            packet_type: PacketType::Ping.wire_name().to_string(),
            client_id: client_id.clone(),
            sequence: *sequence,
            payload: None,
        },
        Packet::Pong {
            client_id,
            sequence,
        } => WireEnvelope {
            packet_type: PacketType::Pong.wire_name().to_string(),
            client_id: client_id.clone(),
            sequence: *sequence,
            payload: None,
        },
        Packet::DiscoverRequest { client_id } => WireEnvelope {
            packet_type: PacketType::DiscoverRequest.wire_name().to_string(),
            client_id: client_id.clone(),
            sequence: None,
            payload: None,
        },
        Packet::DiscoverResponse { client_id, server } => WireEnvelope {
            packet_type: PacketType::DiscoverResponse.wire_name().to_string(),
            client_id: client_id.clone(),
            sequence: None,
            payload: Some(to_value(server)?),
        },
    };

    serde_json::to_vec(&envelope).map_err(|e| MalformedPacketError::Syntax(e.to_string()))
}

/// Decodes one [`Packet`] from the bytes of a received datagram.
///
/// # Errors
///
/// Returns [`MalformedPacketError`] for any structural violation; no partial
/// packet is ever produced.
pub fn decode_packet(bytes: &[u8]) -> Result<Packet, MalformedPacketError> {
    if bytes.len() > MAX_DATAGRAM_SIZE {
        return Err(MalformedPacketError::Oversized { len: bytes.len() });
    }

    let envelope: WireEnvelope = serde_json::from_slice(bytes)
        .map_err(|e| MalformedPacketError::Syntax(e.to_string()))?;

    let packet_type = PacketType::from_wire_name(&envelope.packet_type)
        .ok_or_else(|| MalformedPacketError::UnknownType(envelope.packet_type.clone()))?;

    let WireEnvelope {
        client_id,
        sequence,
        payload,
        ..
    } = envelope;

    match packet_type {
        PacketType::Cmd => {
            let sequence = require_sequence(packet_type, sequence)?;
            let command: Command = from_payload(packet_type, payload)?;
            Ok(Packet::Cmd {
                client_id,
                sequence,
                command,
            })
        }
        PacketType::Ack => {
            let sequence = require_sequence(packet_type, sequence)?;
            Ok(Packet::Ack {
                client_id,
                sequence,
            })
        }
        // `sequence` is optional on liveness probes; `payload` is ignored.
        PacketType::Ping => Ok(Packet::Ping {
            client_id,
            sequence,
        }),
        PacketType::Pong => Ok(Packet::Pong {
            client_id,
            sequence,
        }),
        PacketType::DiscoverRequest => Ok(Packet::DiscoverRequest { client_id }),
        PacketType::DiscoverResponse => {
            let server: ServerIdentity = from_payload(packet_type, payload)?;
            Ok(Packet::DiscoverResponse { client_id, server })
        }
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn to_value<T: Serialize>(value: &T) -> Result<serde_json::Value, MalformedPacketError> {
    serde_json::to_value(value).map_err(|e| MalformedPacketError::Syntax(e.to_string()))
}

fn require_sequence(
    packet_type: PacketType,
    sequence: Option<u64>,
) -> Result<u64, MalformedPacketError> {
    sequence.ok_or(MalformedPacketError::MissingField {
        packet_type,
        field: "sequence",
    })
}

fn from_payload<T: serde::de::DeserializeOwned>(
    packet_type: PacketType,
    payload: Option<serde_json::Value>,
) -> Result<T, MalformedPacketError> {
    let value = payload.ok_or(MalformedPacketError::MissingField {
        packet_type,
        field: "payload",
    })?;
    serde_json::from_value(value).map_err(|e| MalformedPacketError::InvalidPayload {
        packet_type,
        detail: e.to_string(),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
