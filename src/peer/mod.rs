//! Peer sessions
//!
//! The inbox demultiplexer, the per-connection pumps, session setup, and
//! the manager that feeds sessions to the download driver.

pub mod inbox;
pub mod manager;
pub mod session;

pub use inbox::Inbox;
pub use session::{ClosedSignal, PeerSession};
