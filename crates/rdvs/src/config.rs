use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

/// CLI arguments for the relay server.
#[derive(Parser, Debug, Clone)]
#[command(name = "rdvs")]
#[command(about = "Ephemeral WebRTC signaling relay")]
#[command(version)]
pub struct Args {
    /// Socket address to listen on.
    #[arg(long, default_value = "0.0.0.0:8000", env = "RDVS_LISTEN")]
    pub listen: SocketAddr,
    /// Override only the port of `--listen`.
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,
    /// Serve Prometheus metrics on this address. Disabled when unset.
    #[arg(long, env = "RDVS_METRICS")]
    pub metrics_addr: Option<SocketAddr>,
    /// Maximum total concurrent signaling connections.
    #[arg(long, default_value = "10000", env = "RDVS_MAX_CONNS")]
    pub max_conns: usize,
    /// Maximum concurrent connections per IP address.
    #[arg(long, default_value = "32", env = "RDVS_MAX_CONNS_IP")]
    pub max_conns_ip: usize,
    /// Maximum inbound WebSocket message size in bytes.
    #[arg(long, default_value = "65536", env = "RDVS_MAX_MESSAGE_SIZE")]
    pub max_message_size: usize,
    /// Maximum inbound messages per minute per connection.
    #[arg(long, default_value = "600", env = "RDVS_MSG_RATE")]
    pub msg_rate: u32,
    /// Interval between WebSocket pings in seconds.
    #[arg(long, default_value = "30", env = "RDVS_PING_INTERVAL")]
    pub ping_interval: u64,
    /// Close connections silent for this many seconds.
    #[arg(long, default_value = "120", env = "RDVS_IDLE_TIMEOUT")]
    pub idle_timeout: u64,
    /// Seconds between expiry sweeps.
    #[arg(long, default_value = "300", env = "RDVS_SWEEP_INTERVAL")]
    pub sweep_interval: u64,
    /// Seconds of inactivity after which a session is swept.
    #[arg(long, default_value = "600", env = "RDVS_SESSION_TTL")]
    pub session_ttl: u64,
}

/// Runtime configuration derived from [`Args`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address to listen on.
    pub listen: SocketAddr,
    /// Optional Prometheus endpoint.
    pub metrics_addr: Option<SocketAddr>,
    /// Maximum total concurrent signaling connections.
    pub max_conns: usize,
    /// Maximum concurrent connections per IP address.
    pub max_conns_ip: usize,
    /// Maximum inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Maximum inbound messages per minute per connection.
    pub msg_rate: u32,
    /// Interval between WebSocket pings.
    pub ping_interval: Duration,
    /// Silence after which a connection is closed.
    pub idle_timeout: Duration,
    /// Interval between expiry sweeps.
    pub sweep_interval: Duration,
    /// Inactivity after which a session is swept.
    pub session_ttl: Duration,
}

const MAX_ALLOWED_MESSAGE_SIZE: usize = 1 << 20;
const DAY: Duration = Duration::from_secs(86_400);

impl ServerConfig {
    /// Validates the configuration values are within acceptable bounds.
    /// Returns Ok(()) if valid, Err with description otherwise.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_conns == 0 {
            return Err("max_conns must be greater than 0".to_string());
        }
        if self.max_conns > 1_000_000 {
            return Err("max_conns exceeds reasonable limit (1,000,000)".to_string());
        }

        if self.max_conns_ip == 0 {
            return Err("max_conns_ip must be greater than 0".to_string());
        }
        if self.max_conns_ip > self.max_conns {
            return Err("max_conns_ip cannot exceed max_conns".to_string());
        }

        if self.max_message_size == 0 {
            return Err("max_message_size must be greater than 0".to_string());
        }
        if self.max_message_size > MAX_ALLOWED_MESSAGE_SIZE {
            return Err(format!(
                "max_message_size exceeds maximum allowed ({} bytes)",
                MAX_ALLOWED_MESSAGE_SIZE
            ));
        }

        if self.msg_rate == 0 {
            return Err("msg_rate must be greater than 0".to_string());
        }
        if self.msg_rate > 1_000_000 {
            return Err("msg_rate exceeds reasonable limit (1,000,000 msg/min)".to_string());
        }

        for (name, value) in [
            ("ping_interval", self.ping_interval),
            ("idle_timeout", self.idle_timeout),
            ("sweep_interval", self.sweep_interval),
            ("session_ttl", self.session_ttl),
        ] {
            if value.is_zero() {
                return Err(format!("{name} must be greater than 0"));
            }
            if value > DAY {
                return Err(format!(
                    "{name} exceeds reasonable limit (86400 seconds / 1 day)"
                ));
            }
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8000)),
            metrics_addr: None,
            max_conns: 10_000,
            max_conns_ip: 32,
            max_message_size: 65_536,
            msg_rate: 600,
            ping_interval: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(120),
            sweep_interval: Duration::from_secs(300),
            session_ttl: Duration::from_secs(600),
        }
    }
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        let mut listen = args.listen;
        if let Some(port) = args.port {
            listen.set_port(port);
        }
        Self {
            listen,
            metrics_addr: args.metrics_addr,
            max_conns: args.max_conns,
            max_conns_ip: args.max_conns_ip,
            max_message_size: args.max_message_size,
            msg_rate: args.msg_rate,
            ping_interval: Duration::from_secs(args.ping_interval),
            idle_timeout: Duration::from_secs(args.idle_timeout),
            sweep_interval: Duration::from_secs(args.sweep_interval),
            session_ttl: Duration::from_secs(args.session_ttl),
        }
    }
}
