//! Signaling message decoding and encoding.
//!
//! Inbound messages are JSON objects carrying at least a `type` field. The
//! relay inspects only `type`, `sessionCode` and, for `join`, `isInitiator`;
//! every other field is opaque and travels verbatim to the peer.

use crate::types::{field, message_type, Role, SessionCode, SessionCodeError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors produced while decoding an inbound message.
#[derive(Debug, Error)]
pub enum MessageError {
    /// The text was not valid JSON.
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    /// The JSON value was not an object.
    #[error("message is not a json object")]
    NotAnObject,
    /// A required field was absent.
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    /// A required field had the wrong JSON type.
    #[error("field `{0}` has the wrong type")]
    InvalidField(&'static str),
    /// `sessionCode` was present but unacceptable.
    #[error("invalid session code: {0}")]
    InvalidSessionCode(#[from] SessionCodeError),
}

/// A validated inbound message.
///
/// Variants map 1:1 to wire `type` values; any other `type` that still
/// names a session decodes to [`Inbound::Unrecognized`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Attach the sending connection to a session.
    Join {
        /// Session to join.
        session_code: SessionCode,
        /// Slot to occupy.
        role: Role,
    },
    /// SDP offer for the peer.
    Offer {
        /// Session the offer belongs to.
        session_code: SessionCode,
    },
    /// SDP answer for the peer.
    Answer {
        /// Session the answer belongs to.
        session_code: SessionCode,
    },
    /// ICE candidate for the peer.
    IceCandidate {
        /// Session the candidate belongs to.
        session_code: SessionCode,
    },
    /// Any other message type bound to a session; relayed like the others.
    Unrecognized {
        /// The `type` value as received.
        kind: String,
        /// Session the message belongs to.
        session_code: SessionCode,
    },
}

impl Inbound {
    /// Decode a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError`] if the text is not a JSON object with a
    /// string `type`, a valid `sessionCode`, and (for `join`) a boolean
    /// `isInitiator`.
    pub fn parse(text: &str) -> Result<Self, MessageError> {
        let Value::Object(fields) = serde_json::from_str::<Value>(text)? else {
            return Err(MessageError::NotAnObject);
        };

        let kind = str_field(&fields, field::TYPE)?;
        let session_code = SessionCode::new(str_field(&fields, field::SESSION_CODE)?)?;

        Ok(match kind {
            message_type::JOIN => {
                let is_initiator = match fields.get(field::IS_INITIATOR) {
                    Some(Value::Bool(flag)) => *flag,
                    Some(_) => return Err(MessageError::InvalidField(field::IS_INITIATOR)),
                    None => return Err(MessageError::MissingField(field::IS_INITIATOR)),
                };
                Self::Join {
                    session_code,
                    role: Role::from_is_initiator(is_initiator),
                }
            }
            message_type::OFFER => Self::Offer { session_code },
            message_type::ANSWER => Self::Answer { session_code },
            message_type::ICE_CANDIDATE => Self::IceCandidate { session_code },
            other => Self::Unrecognized {
                kind: other.to_owned(),
                session_code,
            },
        })
    }

    /// The session this message is bound to.
    #[must_use]
    pub fn session_code(&self) -> &SessionCode {
        match self {
            Self::Join { session_code, .. }
            | Self::Offer { session_code }
            | Self::Answer { session_code }
            | Self::IceCandidate { session_code }
            | Self::Unrecognized { session_code, .. } => session_code,
        }
    }

    /// The wire `type` value.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::Join { .. } => message_type::JOIN,
            Self::Offer { .. } => message_type::OFFER,
            Self::Answer { .. } => message_type::ANSWER,
            Self::IceCandidate { .. } => message_type::ICE_CANDIDATE,
            Self::Unrecognized { kind, .. } => kind,
        }
    }
}

fn str_field<'a>(
    fields: &'a Map<String, Value>,
    name: &'static str,
) -> Result<&'a str, MessageError> {
    match fields.get(name) {
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(MessageError::InvalidField(name)),
        None => Err(MessageError::MissingField(name)),
    }
}

/// Messages originated by the relay itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Outbound {
    /// Both roles of the session are occupied.
    Ready,
}

impl Outbound {
    /// Encode as a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_text(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
