//! Common types shared by the rendezvous relay server and its clients.
//!
//! This crate provides:
//! - Session codes and pairing roles ([`types`])
//! - Inbound/outbound signaling message decoding ([`message`])

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod message;
pub mod types;

pub use message::{Inbound, MessageError, Outbound};
pub use types::{Role, SessionCode, SessionCodeError};
