//! Peer wire handshake
//!
//! The fixed 68-byte exchange that opens every peer connection.

use bytes::{BufMut, BytesMut};
use rand::{distributions::Alphanumeric, Rng};

use crate::error::Error;

/// Protocol identifier string
pub const PROTOCOL_STRING: &str = "BitTorrent protocol";

/// Length of the protocol string
pub const PROTOCOL_LENGTH: u8 = 19;

/// Total handshake size on the wire
pub const HANDSHAKE_LENGTH: usize = 68;

/// A peer wire handshake. The eight reserved bytes are always sent as zero
/// and ignored on receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

impl Handshake {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Self { info_hash, peer_id }
    }

    /// Generate a peer ID: the `-PK-0100-` prefix followed by 11 random
    /// ASCII characters.
    pub fn generate_peer_id() -> [u8; 20] {
        let mut peer_id = [0u8; 20];
        peer_id[..9].copy_from_slice(b"-PK-0100-");
        for (slot, ch) in peer_id[9..]
            .iter_mut()
            .zip(rand::thread_rng().sample_iter(&Alphanumeric))
        {
            *slot = ch;
        }
        peer_id
    }

    /// Serialize to the fixed 68-byte wire form
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(HANDSHAKE_LENGTH);
        buf.put_u8(PROTOCOL_LENGTH);
        buf.put_slice(PROTOCOL_STRING.as_bytes());
        buf.put_slice(&[0u8; 8]);
        buf.put_slice(&self.info_hash);
        buf.put_slice(&self.peer_id);
        buf.to_vec()
    }

    /// Deserialize, validating the length byte and the protocol string.
    /// The remote info hash is captured as received.
    pub fn deserialize(data: &[u8]) -> Result<Self, Error> {
        if data.len() < HANDSHAKE_LENGTH {
            return Err(Error::protocol(format!(
                "handshake too short: expected {} bytes, got {}",
                HANDSHAKE_LENGTH,
                data.len()
            )));
        }
        if data[0] != PROTOCOL_LENGTH || &data[1..20] != PROTOCOL_STRING.as_bytes() {
            return Err(Error::protocol("unknown protocol"));
        }

        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&data[28..48]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&data[48..68]);

        Ok(Self { info_hash, peer_id })
    }
}
