//! Torrent metadata
//!
//! The metainfo model and the tracker URL list derived from it.

pub mod metainfo;

pub use metainfo::{tracker_urls, FileEntry, Metainfo};
