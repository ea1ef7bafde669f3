//! Peer wire protocol
//!
//! Handshake and message codecs plus the async framing helpers.

pub mod handshake;
pub mod message;
pub mod wire;

pub use handshake::Handshake;
pub use message::{pack_bitfield, unpack_bitfield, Message, MessageId};
