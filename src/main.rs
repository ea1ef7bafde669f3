//! minnow - main entry point
//!
//! Reads the torrent document from standard input, verifies what is
//! already on disk, then downloads the rest from the swarm.

use std::io::Read;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use minnow::cli::CliArgs;
use minnow::download::{driver, PiecesSet};
use minnow::peer::{manager, Inbox};
use minnow::protocol::Handshake;
use minnow::storage::Storage;
use minnow::torrent::{tracker_urls, Metainfo};
use minnow::{bencode, PeerSession};
use tokio::sync::mpsc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse_args();
    init_logging(&args);

    // Offline part: parse and validate everything before touching the
    // network.
    let mut raw = Vec::new();
    std::io::stdin()
        .read_to_end(&mut raw)
        .context("reading torrent file from stdin")?;

    let root = bencode::parse_dict(&raw).context("unmarshaling metainfo dictionary")?;
    let info_hash = bencode::hash_info(&raw).context("hashing info dictionary")?;
    let metainfo = Metainfo::from_dict(&root).context("parsing metainfo")?;
    let urls = tracker_urls(&root).context("parsing tracker URLs")?;
    let peer_id = Handshake::generate_peer_id();

    let (storage, initial) = Storage::open(&args.output_dir, &metainfo)
        .await
        .context("building file tree")?;

    print_summary(&metainfo, &info_hash, &peer_id, &urls);

    // Online part.
    let metainfo = Arc::new(metainfo);
    let storage = Arc::new(storage);
    let authoritative = Arc::new(PiecesSet::from_bools(&initial));
    let inbox = Arc::new(Inbox::new());

    let (peers_tx, peers_rx) = mpsc::channel::<PeerSession>(1);
    let manager = tokio::spawn(manager::run(
        Arc::clone(&inbox),
        manager::Announcer {
            info_hash,
            peer_id,
            port: args.port,
            total_size: metainfo.total_size,
        },
        urls,
        Arc::clone(&authoritative),
        peers_tx,
    ));

    let driver = driver::run(inbox, metainfo, storage, authoritative, peers_rx);
    tokio::select! {
        biased;
        result = driver => result?,
        result = manager => {
            return Err(match result {
                Ok(Err(err)) => err,
                Ok(Ok(())) => anyhow!("peer manager exited unexpectedly"),
                Err(join_err) => anyhow!("peer manager task failed: {}", join_err),
            });
        }
    }

    info!("finished successfully");
    Ok(())
}

fn init_logging(args: &CliArgs) {
    tracing_subscriber::fmt()
        .with_max_level(args.log_level())
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn print_summary(metainfo: &Metainfo, info_hash: &[u8; 20], peer_id: &[u8; 20], urls: &[String]) {
    println!("{}", metainfo);
    println!("info hash: {}", hex::encode(info_hash));
    println!("peer id: {:?}", String::from_utf8_lossy(peer_id));
    println!("announce: {:?}", urls);
    println!();
}
