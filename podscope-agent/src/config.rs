use clap::Parser;
use podscope_common::flow::new_flow_id;

/// Capture agent configuration; every flag can also come from the environment.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "PodScope capture agent (passive sniffer)")]
pub struct AgentConfig {
    /// Network interface to capture on
    #[arg(long, env = "INTERFACE", default_value = "eth0")]
    pub interface: String,

    /// Hub base address as host:port; the agent speaks plain HTTP to it
    #[arg(long, env = "HUB_ADDRESS")]
    pub hub_address: String,

    /// Agent identity carried on uploads (X-Agent-ID)
    #[arg(long, env = "AGENT_ID", default_value_t = new_flow_id())]
    pub agent_id: String,

    /// Default BPF expression applied when capture starts.
    /// An empty hub-published filter resets back to this value.
    #[arg(long, env = "BPF_FILTER", default_value = "")]
    pub bpf_filter: String,

    /// Downward-API identity of the pod this agent is attached to (optional)
    #[arg(long, env = "POD_NAME")]
    pub pod_name: Option<String>,

    #[arg(long, env = "POD_NAMESPACE")]
    pub pod_namespace: Option<String>,

    #[arg(long, env = "POD_IP")]
    pub pod_ip: Option<String>,
}

impl AgentConfig {
    /// Base URL for hub requests; `HUB_ADDRESS` is a bare host:port.
    pub fn hub_base_url(&self) -> String {
        if self.hub_address.starts_with("http://") || self.hub_address.starts_with("https://") {
            self.hub_address.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", self.hub_address)
        }
    }
}
