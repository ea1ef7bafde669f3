//! Piece fetch pipeline
//!
//! Requests one piece from a peer as a sequence of 16 KiB blocks.
//! Requests go out in ascending offset order, each awaited before the
//! next, with an explicit inbox registration so the matching piece reply
//! finds its way back. The assembled piece must hash to its expected
//! digest.

use sha1::{Digest, Sha1};
use tokio::sync::oneshot;
use tokio::time::{timeout, Duration};
use tracing::trace;

use crate::error::Error;
use crate::peer::inbox::Inbox;
use crate::peer::session::PeerSession;
use crate::protocol::Message;

/// Request granularity on the wire
pub const BLOCK_LENGTH: u32 = 0x4000;

/// How long to wait for each block reply
pub const BLOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Fetch and verify one piece over the given session
pub async fn fetch_piece(
    inbox: &Inbox,
    session: &PeerSession,
    index: u32,
    piece_length: u32,
    hash: [u8; 20],
) -> Result<Vec<u8>, Error> {
    let mut data = Vec::with_capacity(piece_length as usize);

    let mut offset = 0u32;
    while offset < piece_length {
        let length = std::cmp::min(BLOCK_LENGTH, piece_length - offset);

        let key = Message::Piece {
            index,
            begin: offset,
            block: Vec::new(),
        }
        .identity();
        let (tx, rx) = oneshot::channel();
        inbox.expect(session.conn_id, key.clone(), tx);

        let request = Message::Request {
            index,
            begin: offset,
            length,
        };
        if session.out.send(request).await.is_err() {
            inbox.cancel(session.conn_id, &key);
            return Err(Error::io(format!(
                "connection to {} closed while requesting piece {}",
                session.addr, index
            )));
        }

        let reply = match timeout(BLOCK_TIMEOUT, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => {
                return Err(Error::protocol(format!(
                    "reply channel for piece {} offset {} closed",
                    index, offset
                )));
            }
            Err(_) => {
                inbox.cancel(session.conn_id, &key);
                return Err(Error::timeout(format!(
                    "waiting for piece {} block at offset {}",
                    index, offset
                )));
            }
        };

        if let Message::Piece { block, .. } = reply {
            trace!(piece = index, offset, len = block.len(), "block received");
            data.extend_from_slice(&block);
        }
        offset += length;
    }

    let digest: [u8; 20] = Sha1::digest(&data).into();
    if digest != hash {
        return Err(Error::protocol(format!("piece {} hash differs", index)));
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn test_session(out: mpsc::Sender<Message>, conn_id: u64) -> PeerSession {
        PeerSession {
            addr: "127.0.0.1:6881".parse().unwrap(),
            peer_id: [0u8; 20],
            pieces: vec![true],
            conn_id,
            out,
        }
    }

    /// Answers every request with the matching slice of `content`
    fn spawn_responder(
        inbox: Arc<Inbox>,
        conn_id: u64,
        mut requests: mpsc::Receiver<Message>,
        content: Vec<u8>,
    ) {
        tokio::spawn(async move {
            while let Some(message) = requests.recv().await {
                let Message::Request { index, begin, length } = message else {
                    continue;
                };
                let block =
                    content[begin as usize..(begin + length) as usize].to_vec();
                inbox.deliver(conn_id, Message::Piece { index, begin, block });
            }
        });
    }

    #[tokio::test]
    async fn test_fetch_single_block_piece() {
        let inbox = Arc::new(Inbox::new());
        let conn_id = inbox.next_conn_id();
        let (out_tx, out_rx) = mpsc::channel(1);
        let content = vec![0x5au8; 16_384];
        spawn_responder(Arc::clone(&inbox), conn_id, out_rx, content.clone());

        let hash = Sha1::digest(&content).into();
        let session = test_session(out_tx, conn_id);
        let got = fetch_piece(&inbox, &session, 0, 16_384, hash).await.unwrap();
        assert_eq!(got, content);
    }

    #[tokio::test]
    async fn test_fetch_multi_block_piece_with_short_tail() {
        let inbox = Arc::new(Inbox::new());
        let conn_id = inbox.next_conn_id();
        let (out_tx, out_rx) = mpsc::channel(1);
        let content: Vec<u8> = (0..40_000u32).map(|i| i as u8).collect();
        spawn_responder(Arc::clone(&inbox), conn_id, out_rx, content.clone());

        let hash = Sha1::digest(&content).into();
        let session = test_session(out_tx, conn_id);
        let got = fetch_piece(&inbox, &session, 3, 40_000, hash).await.unwrap();
        assert_eq!(got, content);
    }

    #[tokio::test]
    async fn test_fetch_rejects_corrupt_piece() {
        let inbox = Arc::new(Inbox::new());
        let conn_id = inbox.next_conn_id();
        let (out_tx, out_rx) = mpsc::channel(1);
        spawn_responder(Arc::clone(&inbox), conn_id, out_rx, vec![0u8; 16_384]);

        let expected_hash = Sha1::digest(b"something else").into();
        let session = test_session(out_tx, conn_id);
        let err = fetch_piece(&inbox, &session, 0, 16_384, expected_hash)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_times_out_and_cancels() {
        let inbox = Arc::new(Inbox::new());
        let conn_id = inbox.next_conn_id();
        let (out_tx, mut out_rx) = mpsc::channel(1);
        // Swallow the request and never reply.
        tokio::spawn(async move { while out_rx.recv().await.is_some() {} });

        let session = test_session(out_tx, conn_id);
        let err = fetch_piece(&inbox, &session, 0, 16_384, [0u8; 20])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));

        // The registration was cancelled, so a late reply is discarded
        // instead of waking a dead waiter.
        inbox.deliver(
            conn_id,
            Message::Piece {
                index: 0,
                begin: 0,
                block: vec![1],
            },
        );
    }

    #[tokio::test]
    async fn test_fetch_fails_when_session_gone() {
        let inbox = Arc::new(Inbox::new());
        let conn_id = inbox.next_conn_id();
        let (out_tx, out_rx) = mpsc::channel(1);
        drop(out_rx);

        let session = test_session(out_tx, conn_id);
        let err = fetch_piece(&inbox, &session, 0, 16_384, [0u8; 20])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}
