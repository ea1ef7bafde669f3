//! minnow
//!
//! A single-torrent BitTorrent leeching client: it reads a metainfo
//! document, discovers peers through HTTP trackers, and downloads and
//! verifies every piece to disk over the v1 peer wire protocol.

pub mod bencode;
pub mod cli;
pub mod download;
pub mod error;
pub mod peer;
pub mod protocol;
pub mod storage;
pub mod torrent;
pub mod tracker;

pub use error::Error;

pub use bencode::Value;
pub use cli::CliArgs;
pub use download::PiecesSet;
pub use peer::{Inbox, PeerSession};
pub use protocol::{Handshake, Message, MessageId};
pub use storage::Storage;
pub use torrent::{FileEntry, Metainfo};
