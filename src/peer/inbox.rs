//! Message inbox
//!
//! A process-wide demultiplexer matching inbound frames to single-shot
//! waiters. Waiters are keyed by connection id plus the frame's identity
//! key, so identical in-flight requests on different connections never
//! collide.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::oneshot;
use tracing::warn;

use crate::protocol::Message;

type Key = (u64, Vec<u8>);

/// Shared inbox. One per process, handed around behind an `Arc`.
#[derive(Debug, Default)]
pub struct Inbox {
    waiters: Mutex<HashMap<Key, oneshot::Sender<Message>>>,
    next_conn: AtomicU64,
}

impl Inbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an id for a new connection
    pub fn next_conn_id(&self) -> u64 {
        self.next_conn.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a waiter for the message with the given identity key.
    /// The registration must exist before the request that provokes the
    /// reply is sent.
    pub fn expect(&self, conn: u64, key: Vec<u8>, waiter: oneshot::Sender<Message>) {
        let mut waiters = self.waiters.lock().unwrap_or_else(|e| e.into_inner());
        if waiters.insert((conn, key), waiter).is_some() {
            warn!(conn, "inbox: replaced an existing waiter");
        }
    }

    /// Deliver an inbound frame to its waiter, if one is registered.
    /// Unclaimed frames are discarded.
    pub fn deliver(&self, conn: u64, message: Message) {
        let key = (conn, message.identity());
        let waiter = {
            let mut waiters = self.waiters.lock().unwrap_or_else(|e| e.into_inner());
            waiters.remove(&key)
        };
        match waiter {
            Some(tx) => {
                if tx.send(message).is_err() {
                    warn!(conn, "inbox: waiter went away before delivery");
                }
            }
            None => {
                warn!(conn, id = ?message.message_id(), "inbox: no receiver for message, discarding");
            }
        }
    }

    /// Drop a registration. The waiter's channel closes, so a late reply
    /// cannot land in a dead receiver.
    pub fn cancel(&self, conn: u64, key: &[u8]) {
        let mut waiters = self.waiters.lock().unwrap_or_else(|e| e.into_inner());
        if waiters.remove(&(conn, key.to_vec())).is_none() {
            warn!(conn, "inbox: asked to cancel a non-existent registration");
        }
    }
}
