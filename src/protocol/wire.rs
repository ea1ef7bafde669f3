//! Wire framing
//!
//! Reads and writes handshakes and length-prefixed frames on an async
//! stream. Deadlines are the caller's business; every function here runs
//! to completion or I/O error.

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::Error;
use crate::protocol::handshake::{Handshake, HANDSHAKE_LENGTH};
use crate::protocol::message::Message;

/// Read one frame. A zero length prefix decodes to [`Message::KeepAlive`].
pub async fn read_message<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Message, Error> {
    let mut length_buf = [0u8; 4];
    reader
        .read_exact(&mut length_buf)
        .await
        .map_err(|e| Error::io_with_source("reading message length", e.to_string()))?;
    let length = u32::from_be_bytes(length_buf) as usize;
    if length == 0 {
        return Ok(Message::KeepAlive);
    }

    let mut payload = vec![0u8; length];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| Error::io_with_source("reading message body", e.to_string()))?;

    let mut frame = BytesMut::with_capacity(4 + length);
    frame.put_slice(&length_buf);
    frame.put_slice(&payload);
    Message::deserialize(&frame)
}

/// Write one frame and flush
pub async fn write_message<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    message: &Message,
) -> Result<(), Error> {
    writer
        .write_all(&message.serialize())
        .await
        .map_err(|e| Error::io_with_source("writing message", e.to_string()))?;
    writer
        .flush()
        .await
        .map_err(|e| Error::io_with_source("flushing message", e.to_string()))?;
    Ok(())
}

/// Read the fixed 68-byte handshake
pub async fn read_handshake<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Handshake, Error> {
    let mut buf = [0u8; HANDSHAKE_LENGTH];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(|e| Error::io_with_source("reading handshake", e.to_string()))?;
    Handshake::deserialize(&buf)
}

/// Write the handshake and flush
pub async fn write_handshake<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    handshake: &Handshake,
) -> Result<(), Error> {
    writer
        .write_all(&handshake.serialize())
        .await
        .map_err(|e| Error::io_with_source("writing handshake", e.to_string()))?;
    writer
        .flush()
        .await
        .map_err(|e| Error::io_with_source("flushing handshake", e.to_string()))?;
    Ok(())
}
