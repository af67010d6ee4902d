//! Connection handles.
//!
//! A connection task owns a [`ConnHandle`] (the strong end of its outbound
//! queue). The registry only ever stores [`PeerRef`]s, which hold a weak
//! sender: a session can reach a peer but never keeps its channel alive.

use crate::metrics::counters;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Capacity of each connection's outbound queue.
pub const OUTBOUND_QUEUE: usize = 256;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(u64);

impl ConnId {
    fn next() -> Self {
        Self(NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Why an outbound message could not be queued.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// The target connection has finished.
    #[error("peer connection is gone")]
    Gone,
    /// The target's outbound queue is saturated.
    #[error("peer outbound queue is full")]
    Full,
}

impl SendError {
    /// Metric label for this failure.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Gone => "peer_gone",
            Self::Full => "backpressure",
        }
    }
}

/// Owning side of a connection's outbound queue, held by the connection task.
#[derive(Debug)]
pub struct ConnHandle {
    id: ConnId,
    tx: mpsc::Sender<String>,
}

impl ConnHandle {
    /// Allocate a handle and the receiver the socket writer drains.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                id: ConnId::next(),
                tx,
            },
            rx,
        )
    }

    /// Identifier of this connection.
    #[must_use]
    pub fn id(&self) -> ConnId {
        self.id
    }

    /// Non-owning reference suitable for storing in a session.
    #[must_use]
    pub fn peer(&self) -> PeerRef {
        PeerRef {
            id: self.id,
            tx: self.tx.downgrade(),
        }
    }
}

/// Non-owning reference to a connection's outbound queue.
#[derive(Debug, Clone)]
pub struct PeerRef {
    id: ConnId,
    tx: mpsc::WeakSender<String>,
}

impl PeerRef {
    /// Identifier of the referenced connection.
    #[must_use]
    pub fn id(&self) -> ConnId {
        self.id
    }

    /// Queue `text` for the peer without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`SendError`] if the peer is gone or its queue is full.
    pub fn send(&self, text: String) -> Result<(), SendError> {
        let tx = self.tx.upgrade().ok_or(SendError::Gone)?;
        tx.try_send(text).map_err(|e| match e {
            TrySendError::Full(_) => SendError::Full,
            TrySendError::Closed(_) => SendError::Gone,
        })
    }

    /// Best-effort send: failures are logged, counted and swallowed.
    ///
    /// Returns `true` if the message was queued.
    pub fn deliver(&self, text: String) -> bool {
        match self.send(text) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(peer = %self.id, "dropping outbound message: {}", e);
                counters::messages_dropped_total(e.label());
                false
            }
        }
    }
}
