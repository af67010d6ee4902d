use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Install the Prometheus recorder and serve `/metrics` on `addr`.
///
/// Only aggregate counts are recorded; session codes and payloads never
/// become labels.
///
/// # Errors
///
/// Returns an error if the recorder is already installed or binding fails.
pub async fn start_metrics_server(addr: SocketAddr) -> anyhow::Result<()> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    let app = Router::new().route(
        "/metrics",
        get(move || {
            let h = handle.clone();
            async move { h.render() }
        }),
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("metrics server listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Gauges.
pub mod gauges {
    /// Increment the active connections gauge.
    pub fn inc_connections_active() {
        ::metrics::gauge!("rdv_connections_active").increment(1.0);
    }

    /// Decrement the active connections gauge.
    pub fn dec_connections_active() {
        ::metrics::gauge!("rdv_connections_active").decrement(1.0);
    }

    /// Record the current number of registered sessions.
    #[allow(clippy::cast_precision_loss)]
    pub fn sessions_active(count: usize) {
        ::metrics::gauge!("rdv_sessions_active").set(count as f64);
    }
}

/// Event counters.
pub mod counters {
    /// A session was created by a join.
    pub fn sessions_created_total() {
        ::metrics::counter!("rdv_sessions_created_total").increment(1);
    }

    /// Sessions removed by the inactivity sweep.
    pub fn sessions_expired_total(count: u64) {
        ::metrics::counter!("rdv_sessions_expired_total").increment(count);
    }

    /// A join left both roles occupied.
    pub fn pairings_total() {
        ::metrics::counter!("rdv_pairings_total").increment(1);
    }

    /// A signaling message was queued for the peer.
    pub fn messages_relayed_total() {
        ::metrics::counter!("rdv_messages_relayed_total").increment(1);
    }

    /// An inbound or outbound message was dropped for `reason`.
    pub fn messages_dropped_total(reason: &'static str) {
        ::metrics::counter!("rdv_messages_dropped_total", "reason" => reason).increment(1);
    }

    /// An upgrade was refused before the socket opened.
    pub fn connections_rejected_total(reason: &'static str) {
        ::metrics::counter!("rdv_connections_rejected_total", "reason" => reason).increment(1);
    }
}
