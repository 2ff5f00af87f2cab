//! Wire types shared by the hub's HTTP/WebSocket surface and the agent client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::flow::Flow;

/// `GET /api/health` body; doubles as the heartbeat carrier for agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub bpf_filter: String,
}

/// Agent identity registered best-effort at `POST /api/agents`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentInfo {
    pub id: String,
    pub interface: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_ip: Option<String>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowsResponse {
    pub flows: Vec<Flow>,
    pub count: usize,
    pub capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentsResponse {
    pub agents: Vec<AgentInfo>,
    pub count: usize,
}

/// Machine-readable 4xx body for validation failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PauseRequest {
    /// Absent means "toggle".
    #[serde(default)]
    pub paused: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PauseState {
    pub paused: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BpfFilterRequest {
    pub filter: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BpfFilterState {
    pub filter: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BpfFilterResponse {
    pub success: bool,
    pub filter: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub flows: usize,
    pub flow_capacity: usize,
    pub ws_clients: usize,
    pub pcap_size: u64,
    pub session_id: String,
    /// Seconds since the hub started.
    pub uptime: u64,
    pub paused: bool,
}

/// Server-to-client WebSocket frames (text JSON).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum WsFrame {
    /// History snapshot sent once, immediately after upgrade.
    Catchup {
        flows: Vec<Flow>,
        total: usize,
        has_more: bool,
    },
    /// Flows accumulated since the previous batch tick, in arrival order.
    Batch { flows: Vec<Flow> },
}
