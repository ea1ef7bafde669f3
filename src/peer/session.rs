//! Peer session
//!
//! Dials a peer, performs the handshake and bitfield exchange, runs the
//! interested/unchoke dance, and leaves behind two pumps: one reading
//! frames into the inbox, one writing outbound messages. The pumps
//! coordinate shutdown through a please-close signal; exactly one closed
//! notification is emitted per session.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::peer::inbox::Inbox;
use crate::protocol::{pack_bitfield, unpack_bitfield, wire, Handshake, Message};

/// Deadline for establishing the TCP connection
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-message write deadline
pub const WRITE_DEADLINE: Duration = Duration::from_secs(1);

/// Per-message read deadline
pub const READ_DEADLINE: Duration = Duration::from_secs(2);

/// How long to wait for the unchoke after declaring interest
pub const UNCHOKE_TIMEOUT: Duration = Duration::from_secs(5);

/// A ready peer session. Cloned freely; the pumps run until the
/// connection dies.
#[derive(Debug, Clone)]
pub struct PeerSession {
    pub addr: SocketAddr,
    pub peer_id: [u8; 20],
    pub pieces: Vec<bool>,
    pub conn_id: u64,
    pub out: mpsc::Sender<Message>,
}

/// Fires once when the session's socket has been closed
pub type ClosedSignal = oneshot::Receiver<()>;

/// Dial `addr` and bring up a full session.
///
/// Steps: TCP connect, handshake exchange, bitfield exchange, then
/// register an unchoke expectation, declare interest, and wait for the
/// unchoke. Any failure tears the connection down before returning.
pub async fn connect(
    inbox: &Arc<Inbox>,
    addr: SocketAddr,
    info_hash: [u8; 20],
    peer_id: [u8; 20],
    our_pieces: &[bool],
) -> Result<(PeerSession, ClosedSignal)> {
    let mut stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| Error::timeout(format!("connecting to {}", addr)))?
        .map_err(|e| Error::io_with_source(format!("connecting to {}", addr), e.to_string()))?;

    let handshake = Handshake::new(info_hash, peer_id);
    timeout(WRITE_DEADLINE, wire::write_handshake(&mut stream, &handshake))
        .await
        .map_err(|_| Error::timeout(format!("writing handshake to {}", addr)))??;
    let remote = timeout(READ_DEADLINE, wire::read_handshake(&mut stream))
        .await
        .map_err(|_| Error::timeout(format!("reading handshake from {}", addr)))??;
    debug!(%addr, peer_id = %String::from_utf8_lossy(&remote.peer_id), "handshake complete");

    let bitfield = Message::Bitfield {
        bitfield: pack_bitfield(our_pieces),
    };
    timeout(WRITE_DEADLINE, wire::write_message(&mut stream, &bitfield))
        .await
        .map_err(|_| Error::timeout(format!("writing bitfield to {}", addr)))??;

    let reply = loop {
        let message = timeout(READ_DEADLINE, wire::read_message(&mut stream))
            .await
            .map_err(|_| Error::timeout(format!("reading bitfield from {}", addr)))??;
        if message != Message::KeepAlive {
            break message;
        }
    };
    let Message::Bitfield { bitfield } = reply else {
        return Err(Error::protocol(format!(
            "expected bitfield message from {}, got {:?} instead",
            addr,
            reply.message_id()
        ))
        .into());
    };
    let mut remote_pieces = unpack_bitfield(&bitfield);
    if remote_pieces.len() < our_pieces.len() {
        return Err(Error::protocol(format!(
            "bitfield from {} covers {} pieces, expected {}",
            addr,
            remote_pieces.len(),
            our_pieces.len()
        ))
        .into());
    }
    remote_pieces.truncate(our_pieces.len());

    // Connection is up; hand the halves to the pumps.
    let conn_id = inbox.next_conn_id();
    let (read_half, write_half) = stream.into_split();
    let (out_tx, out_rx) = mpsc::channel(1);
    let (please_close_tx, please_close_rx) = mpsc::channel(1);
    let (closed_tx, closed_rx) = oneshot::channel();

    let receive = tokio::spawn(receive_pump(
        read_half,
        Arc::clone(inbox),
        conn_id,
        please_close_tx.clone(),
        addr,
    ));
    tokio::spawn(send_pump(
        write_half,
        out_rx,
        please_close_rx,
        closed_tx,
        receive.abort_handle(),
        addr,
    ));

    let (unchoke_tx, unchoke_rx) = oneshot::channel();
    let unchoke_key = Message::Unchoke.identity();
    inbox.expect(conn_id, unchoke_key.clone(), unchoke_tx);

    debug!(%addr, "sending interested");
    if out_tx.send(Message::Interested).await.is_err() {
        inbox.cancel(conn_id, &unchoke_key);
        let _ = closed_rx.await;
        return Err(Error::io(format!("connection to {} closed during setup", addr)).into());
    }

    match timeout(UNCHOKE_TIMEOUT, unchoke_rx).await {
        Ok(Ok(_)) => {
            debug!(%addr, "received unchoke");
        }
        Ok(Err(_)) => {
            let _ = please_close_tx.send(()).await;
            let _ = closed_rx.await;
            return Err(Error::protocol(format!(
                "unchoke waiter closed for {}",
                addr
            ))
            .into());
        }
        Err(_) => {
            inbox.cancel(conn_id, &unchoke_key);
            let _ = please_close_tx.send(()).await;
            let _ = closed_rx.await;
            return Err(Error::timeout(format!(
                "waiting for unchoke message from {}",
                addr
            ))
            .into());
        }
    }

    let session = PeerSession {
        addr,
        peer_id: remote.peer_id,
        pieces: remote_pieces,
        conn_id,
        out: out_tx,
    };
    Ok((session, closed_rx))
}

/// Read frames under the read deadline and publish them to the inbox.
/// Keep-alives are consumed silently. On any failure, ask the send pump
/// to close the socket.
async fn receive_pump(
    mut reader: OwnedReadHalf,
    inbox: Arc<Inbox>,
    conn_id: u64,
    please_close: mpsc::Sender<()>,
    addr: SocketAddr,
) {
    loop {
        let result = match timeout(READ_DEADLINE, wire::read_message(&mut reader)).await {
            Ok(result) => result,
            Err(_) => Err(Error::timeout("read deadline elapsed")),
        };
        match result {
            Ok(Message::KeepAlive) => continue,
            Ok(message) => inbox.deliver(conn_id, message),
            Err(err) => {
                debug!(%addr, %err, "receive: asking for close");
                let _ = please_close.send(()).await;
                return;
            }
        }
    }
}

/// Write outbound messages under the write deadline. A please-close
/// signal, a write failure, or the last session handle going away all end
/// with the socket closed and a single closed notification.
async fn send_pump(
    mut writer: OwnedWriteHalf,
    mut out: mpsc::Receiver<Message>,
    mut please_close: mpsc::Receiver<()>,
    closed: oneshot::Sender<()>,
    receive: AbortHandle,
    addr: SocketAddr,
) {
    loop {
        tokio::select! {
            message = out.recv() => {
                let Some(message) = message else {
                    debug!(%addr, "send: session dropped, closing");
                    break;
                };
                let result = match timeout(WRITE_DEADLINE, wire::write_message(&mut writer, &message)).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::timeout("write deadline elapsed")),
                };
                if let Err(err) = result {
                    warn!(%addr, %err, "send: write failed, closing");
                    break;
                }
            }
            _ = please_close.recv() => {
                debug!(%addr, "send: was asked to close");
                break;
            }
        }
    }

    let _ = writer.shutdown().await;
    receive.abort();
    // Drain a pending close request so a blocked receive pump is never
    // left waiting; after the abort no further signal can arrive.
    let _ = please_close.try_recv();
    let _ = closed.send(());
    info!(%addr, "connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn read_exactly(stream: &mut TcpStream, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        stream.read_exact(&mut buf).await.unwrap();
        buf
    }

    /// Scripted remote: accepts, answers the handshake and bitfield, and
    /// unchokes as soon as interest is declared.
    async fn accommodating_peer(listener: TcpListener, pieces: Vec<bool>) -> TcpStream {
        let (mut stream, _) = listener.accept().await.unwrap();

        let theirs = read_exactly(&mut stream, 68).await;
        let theirs = Handshake::deserialize(&theirs).unwrap();
        let reply = Handshake::new(theirs.info_hash, [b'r'; 20]);
        stream.write_all(&reply.serialize()).await.unwrap();

        // Their bitfield, then ours.
        let len = u32::from_be_bytes(read_exactly(&mut stream, 4).await.try_into().unwrap());
        read_exactly(&mut stream, len as usize).await;
        let bitfield = Message::Bitfield {
            bitfield: pack_bitfield(&pieces),
        };
        stream.write_all(&bitfield.serialize()).await.unwrap();

        // Interested, answered with unchoke.
        let frame = read_exactly(&mut stream, 5).await;
        assert_eq!(Message::deserialize(&frame).unwrap(), Message::Interested);
        stream.write_all(&Message::Unchoke.serialize()).await.unwrap();

        stream
    }

    #[tokio::test]
    async fn test_connect_full_setup() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let remote_pieces = vec![true, false, true];
        let remote = tokio::spawn(accommodating_peer(listener, remote_pieces.clone()));

        let inbox = Arc::new(Inbox::new());
        let ours = vec![false, false, false];
        let (session, closed) = connect(&inbox, addr, [3u8; 20], [b'l'; 20], &ours)
            .await
            .unwrap();

        assert_eq!(session.peer_id, [b'r'; 20]);
        assert_eq!(session.pieces, remote_pieces);

        // Dropping the remote end fails the next read, which triggers the
        // close handshake and exactly one closed notification.
        drop(remote.await.unwrap());
        closed.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_rejects_non_bitfield_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let theirs = read_exactly(&mut stream, 68).await;
            let theirs = Handshake::deserialize(&theirs).unwrap();
            let reply = Handshake::new(theirs.info_hash, [b'r'; 20]);
            stream.write_all(&reply.serialize()).await.unwrap();
            let len = u32::from_be_bytes(read_exactly(&mut stream, 4).await.try_into().unwrap());
            read_exactly(&mut stream, len as usize).await;
            stream.write_all(&Message::Unchoke.serialize()).await.unwrap();
            // Hold the socket open until the client gives up.
            let _ = stream.read(&mut [0u8; 1]).await;
        });

        let inbox = Arc::new(Inbox::new());
        let err = connect(&inbox, addr, [3u8; 20], [b'l'; 20], &[false])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("expected bitfield"));
    }

    #[tokio::test]
    async fn test_session_messages_reach_inbox() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let remote = tokio::spawn(async move {
            let mut stream = accommodating_peer(listener, vec![true]).await;
            // Answer one request with the matching piece message.
            let frame = read_exactly(&mut stream, 17).await;
            let request = Message::deserialize(&frame).unwrap();
            let Message::Request { index, begin, .. } = request else {
                panic!("expected request, got {:?}", request);
            };
            let piece = Message::Piece {
                index,
                begin,
                block: vec![0xab; 4],
            };
            stream.write_all(&piece.serialize()).await.unwrap();
            stream
        });

        let inbox = Arc::new(Inbox::new());
        let (session, _closed) = connect(&inbox, addr, [3u8; 20], [b'l'; 20], &[false])
            .await
            .unwrap();

        let (tx, rx) = oneshot::channel();
        let expected = Message::Piece {
            index: 0,
            begin: 0,
            block: Vec::new(),
        };
        inbox.expect(session.conn_id, expected.identity(), tx);
        session
            .out
            .send(Message::Request {
                index: 0,
                begin: 0,
                length: 4,
            })
            .await
            .unwrap();

        let got = rx.await.unwrap();
        assert_eq!(
            got,
            Message::Piece {
                index: 0,
                begin: 0,
                block: vec![0xab; 4],
            }
        );
        drop(remote.await.unwrap());
    }
}
