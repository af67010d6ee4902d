//! Core type definitions and protocol constants for the rendezvous relay.

use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;
use thiserror::Error;

/// Maximum accepted length of a session code, in characters.
pub const MAX_SESSION_CODE_LEN: usize = 64;

/// Number of random bytes behind a generated session code (12 hex chars).
pub const GENERATED_CODE_BYTES: usize = 6;

/// Wire `type` values.
pub mod message_type {
    /// Client → relay: attach this connection to a session.
    pub const JOIN: &str = "join";
    /// SDP offer, relayed opaquely.
    pub const OFFER: &str = "offer";
    /// SDP answer, relayed opaquely.
    pub const ANSWER: &str = "answer";
    /// ICE candidate, relayed opaquely.
    pub const ICE_CANDIDATE: &str = "ice-candidate";
    /// Relay → client: both roles of the session are occupied.
    pub const READY: &str = "ready";
}

/// Wire field names inspected by the relay.
pub mod field {
    /// Message discriminator.
    pub const TYPE: &str = "type";
    /// Session code the message is bound to.
    pub const SESSION_CODE: &str = "sessionCode";
    /// Role selector on `join`.
    pub const IS_INITIATOR: &str = "isInitiator";
}

/// Reasons a string is refused as a session code.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionCodeError {
    /// The code was the empty string.
    #[error("session code is empty")]
    Empty,
    /// The code exceeds [`MAX_SESSION_CODE_LEN`].
    #[error("session code too long: max {max}, got {actual}")]
    TooLong {
        /// Maximum accepted length.
        max: usize,
        /// Length received.
        actual: usize,
    },
    /// The code contains control characters.
    #[error("session code contains control characters")]
    ControlCharacter,
}

/// Opaque key identifying one pairing attempt.
///
/// The relay attaches no meaning to the contents; it only bounds the length
/// so that a hostile client cannot grow the registry keys without limit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionCode(String);

impl SessionCode {
    /// Validate and wrap a client-supplied code.
    ///
    /// # Errors
    ///
    /// Returns [`SessionCodeError`] if the code is empty, too long, or
    /// contains control characters.
    pub fn new(code: impl Into<String>) -> Result<Self, SessionCodeError> {
        let code = code.into();
        if code.is_empty() {
            return Err(SessionCodeError::Empty);
        }
        let chars = code.chars().count();
        if chars > MAX_SESSION_CODE_LEN {
            return Err(SessionCodeError::TooLong {
                max: MAX_SESSION_CODE_LEN,
                actual: chars,
            });
        }
        if code.chars().any(char::is_control) {
            return Err(SessionCodeError::ControlCharacter);
        }
        Ok(Self(code))
    }

    /// Generate a fresh random code such as `A3F7B9E2C1D4`.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; GENERATED_CODE_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes.iter().map(|b| format!("{b:02X}")).collect())
    }

    /// The code as sent on the wire.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// One of the two fixed slots a connection may occupy within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The party that created the code and sends the offer.
    Initiator,
    /// The party that joined with a code it was given.
    Joiner,
}

impl Role {
    /// Map the wire `isInitiator` flag to a role.
    #[must_use]
    pub fn from_is_initiator(is_initiator: bool) -> Self {
        if is_initiator {
            Self::Initiator
        } else {
            Self::Joiner
        }
    }

    /// Lowercase name, used in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initiator => "initiator",
            Self::Joiner => "joiner",
        }
    }
}
