use thiserror::Error;

/// Errors that end a single connection or abort startup.
#[derive(Error, Debug)]
pub enum RdvsError {
    /// WebSocket transport error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] axum::Error),
    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a signaling message was not relayed.
///
/// None of these are reported to the sender; the relay stays silent and the
/// client's own handshake timeout takes over.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayDrop {
    /// No session is registered under the message's code.
    #[error("unknown session")]
    UnknownSession,
    /// The sender occupies neither role of the session.
    #[error("sender holds no role in the session")]
    ForeignSender,
    /// The other role is empty.
    #[error("peer not connected")]
    UnpairedRelay,
}

impl RelayDrop {
    /// Metric label for this drop reason.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::UnknownSession => "unknown_session",
            Self::ForeignSender => "foreign_sender",
            Self::UnpairedRelay => "unpaired",
        }
    }
}
