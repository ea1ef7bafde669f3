//! Peer manager
//!
//! Walks the tracker list, announces, and dials the returned addresses.
//! At most one outbound session is active at a time: each ready session is
//! published on the peers channel and the manager blocks on its closed
//! signal before dialing the next address. Exhausting every tracker while
//! the download still runs is fatal.

use std::sync::Arc;

use anyhow::{bail, Result};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::download::PiecesSet;
use crate::peer::inbox::Inbox;
use crate::peer::session::{self, PeerSession};
use crate::tracker;

/// Announce parameters that stay fixed for the life of the process
pub struct Announcer {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
    pub port: u16,
    pub total_size: u64,
}

/// Run the manager until the peers channel is dropped (download finished)
/// or the tracker list is exhausted.
pub async fn run(
    inbox: Arc<Inbox>,
    announcer: Announcer,
    urls: Vec<String>,
    our_pieces: Arc<PiecesSet>,
    peers: mpsc::Sender<PeerSession>,
) -> Result<()> {
    info!("peer manager: started");

    for url in &urls {
        info!(%url, "peer manager: trying tracker");
        let addrs = match tracker::announce(
            url,
            &announcer.info_hash,
            &announcer.peer_id,
            announcer.port,
            announcer.total_size,
        )
        .await
        {
            Ok(addrs) => addrs,
            Err(err) => {
                warn!(%url, %err, "peer manager: announce failed");
                continue;
            }
        };
        info!(%url, count = addrs.len(), "peer manager: got peer addresses");

        for addr in addrs {
            let addr = match addr.parse() {
                Ok(addr) => addr,
                Err(_) => {
                    warn!(%addr, "peer manager: skipping unparseable address");
                    continue;
                }
            };
            let snapshot = our_pieces.snapshot();
            let (session, closed) = match session::connect(
                &inbox,
                addr,
                announcer.info_hash,
                announcer.peer_id,
                &snapshot,
            )
            .await
            {
                Ok(ready) => ready,
                Err(err) => {
                    warn!(%addr, %err, "peer manager: adding peer failed");
                    continue;
                }
            };

            info!(%addr, "peer manager: connected");
            if peers.send(session).await.is_err() {
                // Download finished; nobody wants sessions anymore.
                return Ok(());
            }
            info!(%addr, "peer manager: session passed on, waiting for it to close");
            let _ = closed.await;
            info!(%addr, "peer manager: session closed");
        }
    }

    bail!("peer manager: tried all trackers, giving up")
}
