//! Protocol module containing packet types, the JSON codec, and the
//! duplicate-suppression window.

pub mod codec;
pub mod packet;
pub mod window;

pub use codec::{decode_packet, encode_packet, MalformedPacketError};
pub use packet::*;
pub use window::SequenceWindow;
