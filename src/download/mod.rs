//! Download orchestration
//!
//! The authoritative pieces-set, the speculative picker, the per-piece
//! block fetch pipeline, and the driver that ties them to peer sessions.

pub mod driver;
pub mod fetch;
pub mod picker;
pub mod pieces;

pub use fetch::{BLOCK_LENGTH, BLOCK_TIMEOUT};
pub use pieces::PiecesSet;
