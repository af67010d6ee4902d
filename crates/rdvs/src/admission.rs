//! Connection-count limits applied before a WebSocket upgrade.

use crate::metrics::counters;
use crate::server::ServerState;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use dashmap::mapref::entry::Entry;
use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Why an upgrade was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// `max_conns` signaling connections are already open.
    ServerFull,
    /// The client IP already holds `max_conns_ip` connections.
    TooManyFromIp,
}

impl Rejection {
    fn label(self) -> &'static str {
        match self {
            Self::ServerFull => "max_conns",
            Self::TooManyFromIp => "max_conns_ip",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServerFull => f.write_str("connection limit reached"),
            Self::TooManyFromIp => f.write_str("per-IP connection limit reached"),
        }
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let status = match self {
            Self::ServerFull => StatusCode::SERVICE_UNAVAILABLE,
            Self::TooManyFromIp => StatusCode::TOO_MANY_REQUESTS,
        };
        (status, self.to_string()).into_response()
    }
}

/// A claimed connection slot; released when dropped.
pub struct SlotGuard {
    state: Arc<ServerState>,
    ip: IpAddr,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.state.active_connections.fetch_sub(1, Ordering::AcqRel);
        let mut remove = false;
        if let Some(mut entry) = self.state.ip_connections.get_mut(&self.ip) {
            *entry = entry.saturating_sub(1);
            if *entry == 0 {
                remove = true;
            }
        }
        if remove {
            self.state
                .ip_connections
                .remove_if(&self.ip, |_, v| *v == 0);
        }
    }
}

/// Claim a slot for a connection from `ip`.
///
/// The global counter is incremented before it is checked, and the per-IP
/// counter is updated through the map entry, so racing upgrades cannot
/// both slip past a limit.
pub fn admit(state: &Arc<ServerState>, ip: IpAddr) -> Result<SlotGuard, Rejection> {
    let previous = state.active_connections.fetch_add(1, Ordering::AcqRel);
    if previous >= state.config.max_conns {
        state.active_connections.fetch_sub(1, Ordering::AcqRel);
        counters::connections_rejected_total(Rejection::ServerFull.label());
        return Err(Rejection::ServerFull);
    }

    let over_ip_limit = match state.ip_connections.entry(ip) {
        Entry::Occupied(mut entry) => {
            if *entry.get() >= state.config.max_conns_ip {
                true
            } else {
                *entry.get_mut() += 1;
                false
            }
        }
        Entry::Vacant(entry) => {
            entry.insert(1);
            false
        }
    };

    if over_ip_limit {
        state.active_connections.fetch_sub(1, Ordering::AcqRel);
        counters::connections_rejected_total(Rejection::TooManyFromIp.label());
        return Err(Rejection::TooManyFromIp);
    }

    Ok(SlotGuard {
        state: Arc::clone(state),
        ip,
    })
}
