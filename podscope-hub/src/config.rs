use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

/// Session hub configuration; every flag can also come from the environment.
/// Read once at startup and passed down by value.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "PodScope session hub")]
pub struct HubConfig {
    /// Address and port to listen on
    #[arg(long, env = "HUB_LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Flow ring capacity
    #[arg(long, env = "MAX_FLOWS", default_value_t = 10_000)]
    pub max_flows: usize,

    /// WebSocket batch tick in milliseconds
    #[arg(long, env = "WS_BATCH_INTERVAL_MS", default_value_t = 150)]
    pub ws_batch_interval_ms: u64,

    /// Number of flows sent in the catch-up message to a new client
    #[arg(long, env = "WS_CATCHUP_LIMIT", default_value_t = 200)]
    pub ws_catchup_limit: usize,

    /// Directory holding the per-agent pcap files
    #[arg(long, env = "PCAP_DIR", default_value = "/data/pcap")]
    pub pcap_dir: PathBuf,

    /// Soft cap on the aggregated pcap size in bytes
    #[arg(long, env = "PCAP_MAX_BYTES", default_value_t = 50 * 1024 * 1024)]
    pub pcap_max_bytes: u64,

    /// Session identifier echoed in responses and download names
    #[arg(long, env = "SESSION_ID", default_value = "local")]
    pub session_id: String,
}
