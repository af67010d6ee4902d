//! Per-connection signaling logic.
//!
//! [`Connection`] is the transport-independent state machine
//! (`Unjoined` → `Joined` → `Closed`). `handle_socket` drives one from a
//! WebSocket and drains the connection's outbound queue.

use crate::admission::SlotGuard;
use crate::config::ServerConfig;
use crate::error::RdvsError;
use crate::metrics::{counters, gauges};
use crate::peer::{ConnHandle, ConnId, OUTBOUND_QUEUE};
use crate::ratelimit::RateLimiter;
use crate::server::ServerState;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use rdv_common::{Inbound, Outbound, Role, SessionCode};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::time::interval_at;
use tracing::{debug, warn};

type WsSink = SplitSink<WebSocket, Message>;
type WsRecv = SplitStream<WebSocket>;

/// Lifecycle of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    /// No valid `join` received yet.
    Unjoined,
    /// Attached to a session.
    Joined(SessionCode),
    /// Disconnected; the registry no longer references this connection.
    Closed,
}

/// Signaling state for one client.
///
/// Dropping a `Connection` disconnects it, so the registry is cleaned up
/// exactly once however the socket ends.
pub struct Connection {
    state: Arc<ServerState>,
    handle: ConnHandle,
    phase: Phase,
    limiter: RateLimiter,
}

impl Connection {
    /// Wrap `handle` as a fresh, unjoined connection.
    #[must_use]
    pub fn new(state: Arc<ServerState>, handle: ConnHandle) -> Self {
        Self {
            state,
            handle,
            phase: Phase::Unjoined,
            limiter: RateLimiter::new(),
        }
    }

    /// Identifier of this connection.
    #[must_use]
    pub fn id(&self) -> ConnId {
        self.handle.id()
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    /// Handle one inbound text message. Never fails: anything that cannot
    /// be acted on is dropped.
    pub fn on_text(&mut self, text: &str) {
        if self.phase == Phase::Closed {
            return;
        }
        if !self.limiter.allow(self.state.config.msg_rate, Instant::now()) {
            counters::messages_dropped_total("rate_limit");
            return;
        }

        let msg = match Inbound::parse(text) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(conn = %self.id(), "discarding malformed message: {}", e);
                counters::messages_dropped_total("malformed");
                return;
            }
        };

        match msg {
            Inbound::Join { session_code, role } => self.join(session_code, role),
            other => self.relay(other.session_code(), other.kind(), text),
        }
    }

    fn join(&mut self, code: SessionCode, role: Role) {
        if let Phase::Joined(current) = &self.phase {
            if *current != code {
                debug!(conn = %self.id(), "ignoring join for a second session");
                counters::messages_dropped_total("session_switch");
                return;
            }
        }

        let outcome = self.state.registry.join(&code, role, self.handle.peer());
        debug!(
            conn = %self.id(),
            session = %code,
            role = role.as_str(),
            created = outcome.created,
            "joined session"
        );
        if let Some(displaced) = outcome.displaced {
            debug!(conn = %self.id(), %displaced, "role taken over from previous holder");
        }
        self.phase = Phase::Joined(code);

        // Fires on every join that leaves both roles occupied, including
        // re-joins while the peer is present.
        if let Some(pair) = outcome.paired {
            counters::pairings_total();
            let ready = match Outbound::Ready.to_text() {
                Ok(text) => text,
                Err(e) => {
                    warn!(conn = %self.id(), "cannot encode ready: {}", e);
                    return;
                }
            };
            for peer in pair {
                peer.deliver(ready.clone());
            }
        }
    }

    fn relay(&self, code: &SessionCode, kind: &str, text: &str) {
        match self.state.registry.route(code, self.id()) {
            Ok(peer) => {
                if peer.deliver(text.to_owned()) {
                    counters::messages_relayed_total();
                }
            }
            Err(reason) => {
                debug!(conn = %self.id(), kind, "dropping relay: {}", reason);
                counters::messages_dropped_total(reason.label());
            }
        }
    }

    /// Detach from the joined session, if any, and enter `Closed`.
    /// Idempotent.
    pub fn disconnect(&mut self) {
        let previous = std::mem::replace(&mut self.phase, Phase::Closed);
        if let Phase::Joined(code) = previous {
            let removed = self.state.registry.clear_handle(&code, self.id());
            debug!(conn = %self.id(), session = %code, removed, "left session");
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Drive a signaling connection until the socket closes.
///
/// # Errors
///
/// Returns an error if the WebSocket fails; the connection is cleaned up
/// either way.
pub(crate) async fn handle_socket(
    socket: WebSocket,
    state: Arc<ServerState>,
    _slot: SlotGuard,
) -> Result<(), RdvsError> {
    let (handle, mut deliver_rx) = ConnHandle::channel(OUTBOUND_QUEUE);
    let mut conn = Connection::new(Arc::clone(&state), handle);
    gauges::inc_connections_active();

    let (mut ws_tx, mut ws_rx) = socket.split();
    let result = run_message_loop(
        &mut ws_tx,
        &mut ws_rx,
        &mut deliver_rx,
        &mut conn,
        &state.config,
    )
    .await;

    conn.disconnect();
    gauges::dec_connections_active();

    result
}

async fn run_message_loop(
    ws_tx: &mut WsSink,
    ws_rx: &mut WsRecv,
    deliver_rx: &mut mpsc::Receiver<String>,
    conn: &mut Connection,
    config: &ServerConfig,
) -> Result<(), RdvsError> {
    let mut ping_interval = interval_at(
        tokio::time::Instant::now() + config.ping_interval,
        config.ping_interval,
    );
    let mut last_activity = Instant::now();

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                last_activity = Instant::now();
                match msg {
                    Some(Ok(Message::Text(text))) => conn.on_text(&text),
                    Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => conn.on_text(text),
                        Err(_) => {
                            debug!(conn = %conn.id(), "discarding non-utf8 binary message");
                            counters::messages_dropped_total("malformed");
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    // Also reached for messages over `max_message_size`; the
                    // stream cannot resume after one.
                    Some(Err(e)) => return Err(RdvsError::WebSocket(e)),
                    Some(Ok(_)) => {}
                }
            }
            Some(text) = deliver_rx.recv() => {
                ws_tx.send(Message::Text(text)).await?;
            }
            _ = ping_interval.tick() => {
                if last_activity.elapsed() >= config.idle_timeout {
                    debug!(conn = %conn.id(), "idle timeout reached, closing connection");
                    return Ok(());
                }
                if let Err(e) = ws_tx.send(Message::Ping(Vec::new())).await {
                    debug!("failed to send ping: {}", e);
                }
            }
        }
    }
}
