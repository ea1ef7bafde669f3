//! Peer wire messages
//!
//! Length-prefixed typed frames, their codec, and the header-only identity
//! key used to match replies to outstanding requests.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::Error;

/// Wire type codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
}

impl TryFrom<u8> for MessageId {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Error> {
        match value {
            0 => Ok(MessageId::Choke),
            1 => Ok(MessageId::Unchoke),
            2 => Ok(MessageId::Interested),
            3 => Ok(MessageId::NotInterested),
            4 => Ok(MessageId::Have),
            5 => Ok(MessageId::Bitfield),
            6 => Ok(MessageId::Request),
            7 => Ok(MessageId::Piece),
            8 => Ok(MessageId::Cancel),
            _ => Err(Error::decode(format!("message has unknown type ({})", value))),
        }
    }
}

/// A peer wire message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have { piece_index: u32 },
    Bitfield { bitfield: Vec<u8> },
    Request { index: u32, begin: u32, length: u32 },
    Piece { index: u32, begin: u32, block: Vec<u8> },
    Cancel { index: u32, begin: u32, length: u32 },
}

impl Message {
    /// The wire type code; `None` for keep-alives
    pub fn message_id(&self) -> Option<MessageId> {
        match self {
            Message::KeepAlive => None,
            Message::Choke => Some(MessageId::Choke),
            Message::Unchoke => Some(MessageId::Unchoke),
            Message::Interested => Some(MessageId::Interested),
            Message::NotInterested => Some(MessageId::NotInterested),
            Message::Have { .. } => Some(MessageId::Have),
            Message::Bitfield { .. } => Some(MessageId::Bitfield),
            Message::Request { .. } => Some(MessageId::Request),
            Message::Piece { .. } => Some(MessageId::Piece),
            Message::Cancel { .. } => Some(MessageId::Cancel),
        }
    }

    /// Payload length excluding the 4-byte prefix
    pub fn length(&self) -> u32 {
        match self {
            Message::KeepAlive => 0,
            Message::Choke
            | Message::Unchoke
            | Message::Interested
            | Message::NotInterested => 1,
            Message::Have { .. } => 5,
            Message::Bitfield { bitfield } => 1 + bitfield.len() as u32,
            Message::Request { .. } | Message::Cancel { .. } => 13,
            Message::Piece { block, .. } => 9 + block.len() as u32,
        }
    }

    /// Serialize to wire form, length prefix included
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(4 + self.length() as usize);
        buf.put_u32(self.length());
        if let Some(id) = self.message_id() {
            buf.put_u8(id as u8);
        }
        match self {
            Message::KeepAlive
            | Message::Choke
            | Message::Unchoke
            | Message::Interested
            | Message::NotInterested => {}
            Message::Have { piece_index } => {
                buf.put_u32(*piece_index);
            }
            Message::Bitfield { bitfield } => {
                buf.put_slice(bitfield);
            }
            Message::Request { index, begin, length }
            | Message::Cancel { index, begin, length } => {
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_u32(*length);
            }
            Message::Piece { index, begin, block } => {
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_slice(block);
            }
        }
        buf.to_vec()
    }

    /// Deserialize from wire form, length prefix included
    pub fn deserialize(data: &[u8]) -> Result<Self, Error> {
        let mut buf = BytesMut::from(data);
        if buf.remaining() < 4 {
            return Err(Error::decode("frame shorter than its length prefix"));
        }
        let length = buf.get_u32() as usize;
        if length == 0 {
            return Ok(Message::KeepAlive);
        }
        if buf.remaining() < length {
            return Err(Error::decode(format!(
                "frame body truncated: expected {} bytes, got {}",
                length,
                buf.remaining()
            )));
        }

        let id = MessageId::try_from(buf.get_u8())?;
        match id {
            MessageId::Choke => Ok(Message::Choke),
            MessageId::Unchoke => Ok(Message::Unchoke),
            MessageId::Interested => Ok(Message::Interested),
            MessageId::NotInterested => Ok(Message::NotInterested),
            MessageId::Have => {
                if buf.remaining() < 4 {
                    return Err(Error::decode("have message too short"));
                }
                Ok(Message::Have {
                    piece_index: buf.get_u32(),
                })
            }
            MessageId::Bitfield => Ok(Message::Bitfield {
                bitfield: buf.to_vec(),
            }),
            MessageId::Request | MessageId::Cancel => {
                if buf.remaining() < 12 {
                    return Err(Error::decode("request message too short"));
                }
                let index = buf.get_u32();
                let begin = buf.get_u32();
                let length = buf.get_u32();
                if id == MessageId::Request {
                    Ok(Message::Request { index, begin, length })
                } else {
                    Ok(Message::Cancel { index, begin, length })
                }
            }
            MessageId::Piece => {
                if buf.remaining() < 8 {
                    return Err(Error::decode("piece message too short"));
                }
                let index = buf.get_u32();
                let begin = buf.get_u32();
                Ok(Message::Piece {
                    index,
                    begin,
                    block: buf.to_vec(),
                })
            }
        }
    }

    /// The identity key of a message: its wire form with the variable
    /// payload stripped. A request and the piece reply it provokes share
    /// header fields, so a waiter registered under the reply's identity is
    /// found by content alone.
    pub fn identity(&self) -> Vec<u8> {
        match self {
            Message::Piece { index, begin, .. } => Message::Piece {
                index: *index,
                begin: *begin,
                block: Vec::new(),
            }
            .serialize(),
            Message::Bitfield { .. } => Message::Bitfield {
                bitfield: Vec::new(),
            }
            .serialize(),
            other => other.serialize(),
        }
    }
}

/// Pack a pieces-set MSB-first: bit `i` lands in byte `i / 8` under mask
/// `1 << (7 - i % 8)`.
pub fn pack_bitfield(pieces: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; pieces.len().div_ceil(8)];
    for (i, &have) in pieces.iter().enumerate() {
        if have {
            bytes[i / 8] |= 1 << (7 - (i % 8));
        }
    }
    bytes
}

/// Unpack a bitfield into one bool per bit. The caller truncates to the
/// known piece count; trailing bits are padding.
pub fn unpack_bitfield(bytes: &[u8]) -> Vec<bool> {
    let mut pieces = vec![false; bytes.len() * 8];
    for (j, byte) in bytes.iter().enumerate() {
        for i in 0..8 {
            if byte & (1 << (7 - i)) != 0 {
                pieces[8 * j + i] = true;
            }
        }
    }
    pieces
}
