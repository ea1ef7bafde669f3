//! Download driver
//!
//! Consumes piece indices from the picker and peer sessions from the
//! manager, forking one fetch task per piece under a bounded number of
//! outstanding fetches. Failed pieces go back on the pieces channel
//! unless another attempt completed them first. The driver exits once the
//! picker declares the set complete and every in-flight fetch has
//! released its slot.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::download::{fetch, picker, pieces::PiecesSet};
use crate::peer::inbox::Inbox;
use crate::peer::session::PeerSession;
use crate::storage::Storage;
use crate::torrent::Metainfo;

/// Bound on concurrently outstanding piece fetches
pub const MAX_OUTSTANDING: usize = 5;

/// Run until every piece is verified on disk
pub async fn run(
    inbox: Arc<Inbox>,
    metainfo: Arc<Metainfo>,
    storage: Arc<Storage>,
    authoritative: Arc<PiecesSet>,
    mut peers: mpsc::Receiver<PeerSession>,
) -> Result<()> {
    let (pieces_tx, mut pieces) = mpsc::channel::<u32>(1);
    let mut picker: JoinHandle<()> =
        tokio::spawn(picker::run(Arc::clone(&authoritative), pieces_tx.clone()));

    let semaphore = Arc::new(Semaphore::new(MAX_OUTSTANDING));
    let mut current: Option<PeerSession> = None;
    let mut peers_open = true;

    loop {
        let index = tokio::select! {
            maybe = pieces.recv() => match maybe {
                Some(index) => index,
                None => break,
            },
            _ = &mut picker => break,
        };
        debug!(piece = index, "getting piece");

        if current.is_none() {
            info!("waiting for a peer connection");
            match peers.recv().await {
                Some(session) => {
                    info!(addr = %session.addr, "got connection");
                    current = Some(session);
                }
                None => {
                    picker.abort();
                    bail!("peer supply ended before the download completed");
                }
            }
        }

        // Take a fetch slot, adopting a fresher peer if one shows up first.
        let permit = loop {
            tokio::select! {
                permit = Arc::clone(&semaphore).acquire_owned() => {
                    break permit.context("acquiring fetch slot")?;
                }
                maybe = peers.recv(), if peers_open => match maybe {
                    Some(session) => {
                        info!(addr = %session.addr, "switching to new connection");
                        current = Some(session);
                    }
                    None => peers_open = false,
                },
            }
        };

        let session = current.clone().context("no current peer session")?;
        let piece_length = metainfo.piece_len(index);
        let hash = metainfo.piece_hashes[index as usize];
        let inbox = Arc::clone(&inbox);
        let storage = Arc::clone(&storage);
        let authoritative = Arc::clone(&authoritative);
        let retry = pieces_tx.clone();

        tokio::spawn(async move {
            let result = async {
                let data =
                    fetch::fetch_piece(&inbox, &session, index, piece_length, hash).await?;
                storage.write_piece(index, &data).await
            }
            .await;

            match result {
                Ok(()) => {
                    authoritative.set(index as usize);
                    info!(piece = index, "got piece");
                    drop(permit);
                }
                Err(err) => {
                    drop(permit);
                    if !authoritative.get(index as usize) {
                        warn!(piece = index, %err, "putting piece back in queue");
                        let _ = retry.send(index).await;
                    } else {
                        debug!(piece = index, %err, "fetch failed but piece already complete");
                    }
                }
            }
        });
    }

    // Let every in-flight fetch finish before declaring the download done.
    let _ = Arc::clone(&semaphore)
        .acquire_many_owned(MAX_OUTSTANDING as u32)
        .await
        .context("draining fetch slots")?;
    picker.abort();

    if !authoritative.all() {
        bail!("pieces channel closed with pieces still missing");
    }
    info!("download driver: finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::session;
    use crate::protocol::{pack_bitfield, Handshake, Message};
    use crate::torrent::FileEntry;
    use sha1::{Digest, Sha1};
    use std::path::PathBuf;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn scratch_dir() -> PathBuf {
        use std::sync::atomic::{AtomicU32, Ordering};
        static SEQ: AtomicU32 = AtomicU32::new(0);
        let dir = std::env::temp_dir().join(format!(
            "minnow-driver-test-{}-{}",
            std::process::id(),
            SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    async fn read_frame(stream: &mut TcpStream) -> Option<Message> {
        let mut len = [0u8; 4];
        stream.read_exact(&mut len).await.ok()?;
        let mut body = vec![0u8; u32::from_be_bytes(len) as usize];
        stream.read_exact(&mut body).await.ok()?;
        let mut frame = len.to_vec();
        frame.extend_from_slice(&body);
        Message::deserialize(&frame).ok()
    }

    /// Scripted seeder holding the whole torrent: completes the session
    /// setup, then serves every block request out of `content`.
    async fn seeder(listener: TcpListener, content: Vec<u8>, piece_count: usize) {
        let (mut stream, _) = listener.accept().await.unwrap();

        let mut handshake = [0u8; 68];
        stream.read_exact(&mut handshake).await.unwrap();
        let theirs = Handshake::deserialize(&handshake).unwrap();
        let reply = Handshake::new(theirs.info_hash, [b's'; 20]);
        stream.write_all(&reply.serialize()).await.unwrap();

        read_frame(&mut stream).await.unwrap();
        let bitfield = Message::Bitfield {
            bitfield: pack_bitfield(&vec![true; piece_count]),
        };
        stream.write_all(&bitfield.serialize()).await.unwrap();

        assert_eq!(read_frame(&mut stream).await.unwrap(), Message::Interested);
        stream.write_all(&Message::Unchoke.serialize()).await.unwrap();

        while let Some(message) = read_frame(&mut stream).await {
            let Message::Request { index, begin, length } = message else {
                continue;
            };
            let start = index as usize * 16_384 + begin as usize;
            let piece = Message::Piece {
                index,
                begin,
                block: content[start..start + length as usize].to_vec(),
            };
            if stream.write_all(&piece.serialize()).await.is_err() {
                return;
            }
        }
    }

    #[tokio::test]
    async fn test_downloads_single_piece_torrent() {
        let content = vec![0x42u8; 16_384];
        let hash: [u8; 20] = Sha1::digest(&content).into();
        let metainfo = Arc::new(Metainfo {
            name: "single".to_string(),
            piece_length: 16_384,
            piece_hashes: vec![hash],
            total_size: 16_384,
            files: vec![FileEntry {
                is_dir: false,
                path: PathBuf::from("single"),
                size: 16_384,
            }],
        });

        let root = scratch_dir();
        let (storage, initial) = Storage::open(&root, &metainfo).await.unwrap();
        assert_eq!(initial, vec![false]);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(seeder(listener, content.clone(), 1));

        let inbox = Arc::new(Inbox::new());
        let (session, _closed) = session::connect(&inbox, addr, [7u8; 20], [b'l'; 20], &initial)
            .await
            .unwrap();

        let (peers_tx, peers_rx) = mpsc::channel(1);
        peers_tx.send(session).await.unwrap();

        let authoritative = Arc::new(PiecesSet::from_bools(&initial));
        run(
            inbox,
            Arc::clone(&metainfo),
            Arc::new(storage),
            Arc::clone(&authoritative),
            peers_rx,
        )
        .await
        .unwrap();

        assert!(authoritative.all());
        assert_eq!(std::fs::read(root.join("single")).unwrap(), content);
        std::fs::remove_dir_all(&root).unwrap();
    }

    #[tokio::test]
    async fn test_exits_when_nothing_is_missing() {
        let metainfo = Arc::new(Metainfo {
            name: "done".to_string(),
            piece_length: 16_384,
            piece_hashes: vec![[0u8; 20]],
            total_size: 16_384,
            files: vec![FileEntry {
                is_dir: false,
                path: PathBuf::from("done"),
                size: 16_384,
            }],
        });
        let root = scratch_dir();
        let (storage, _) = Storage::open(&root, &metainfo).await.unwrap();

        let (_peers_tx, peers_rx) = mpsc::channel::<PeerSession>(1);
        let authoritative = Arc::new(PiecesSet::from_bools(&[true]));
        run(
            Arc::new(Inbox::new()),
            metainfo,
            Arc::new(storage),
            authoritative,
            peers_rx,
        )
        .await
        .unwrap();
        std::fs::remove_dir_all(&root).unwrap();
    }
}
