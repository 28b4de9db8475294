//! # buttonbox-core
//!
//! Shared library for ButtonBox containing the UDP wire protocol, the
//! command payload schemas, and the bounded sequence window used for
//! duplicate suppression.
//!
//! This crate is used by the server engine and by any native client or test
//! harness that speaks the protocol. It has zero dependencies on OS APIs,
//! UI frameworks, or network sockets.
//!
//! - **`protocol`** – How bytes travel over the network. Each UDP datagram
//!   carries one JSON-encoded packet envelope; the codec turns datagrams
//!   into typed [`Packet`] values and back, rejecting anything malformed.

pub mod protocol;

pub use protocol::codec::{decode_packet, encode_packet, MalformedPacketError};
pub use protocol::packet::{
    Command, Packet, PacketType, ServerIdentity, DEFAULT_COMMAND_PORT, MAX_DATAGRAM_SIZE,
    PROTOCOL_VERSION, SERVICE_TYPE,
};
pub use protocol::window::SequenceWindow;
