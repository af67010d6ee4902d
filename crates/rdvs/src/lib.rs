//! Rendezvous relay server: pairs two WebSocket clients under a session
//! code and relays their WebRTC signaling until they connect directly.
//!
//! All state is in memory and lives only as long as the process.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod admission;
/// CLI argument parsing and server configuration.
pub mod config;
pub mod connection;
/// Error types for relay server operations.
pub mod error;
/// Prometheus metrics collection and HTTP endpoint.
pub mod metrics;
pub mod peer;
mod ratelimit;
pub mod registry;
/// HTTP routing, accept loop and shared server state.
pub mod server;
pub mod sweeper;

pub use server::{run, run_with_shutdown, ServerState};
