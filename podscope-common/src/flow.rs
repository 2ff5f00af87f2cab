use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rand::distr::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Cap on the per-direction payload buffers kept for protocol parsing.
pub const MAX_PAYLOAD_BYTES: usize = 1024;

/// Application protocol recognized on a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Tcp,
    Http,
    Tls,
    Https,
}

/// Terminal state of a completed flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FlowStatus {
    Closed,
    Reset,
    Timeout,
}

/// Parsed HTTP/1.1 request/response metadata for a flow.
///
/// Header maps use lowercase names; multi-value headers are joined with ", ".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpInfo {
    pub method: String,
    pub url: String,
    pub host: String,
    pub status_code: u16,
    pub status_text: String,
    #[serde(default)]
    pub request_headers: HashMap<String, String>,
    #[serde(default)]
    pub response_headers: HashMap<String, String>,
    #[serde(default)]
    pub content_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_length: Option<u64>,
}

/// TLS ClientHello metadata for a flow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsInfo {
    pub version: String,
    pub sni: String,
    #[serde(default)]
    pub cipher_suites: Vec<u16>,
    pub encrypted: bool,
}

/// A bidirectional TCP conversation observed at one interface.
///
/// The canonical `(src_ip, src_port)` is the source of the first packet seen;
/// that orientation persists for the lifetime of the flow. Payload buffers and
/// parser bookkeeping are agent-local and never cross the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flow {
    pub id: String,
    #[serde(skip)]
    pub key: String,
    pub src_ip: String,
    pub src_port: u16,
    pub dst_ip: String,
    pub dst_port: u16,
    pub protocol: Protocol,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub syn_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub syn_ack_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_data_time: Option<DateTime<Utc>>,
    /// Client-to-server bytes.
    pub bytes_sent: u64,
    /// Server-to-client bytes.
    pub bytes_received: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    #[serde(skip)]
    pub client_payload: Vec<u8>,
    #[serde(skip)]
    pub server_payload: Vec<u8>,
    #[serde(skip)]
    pub fin_seen: bool,
    #[serde(skip)]
    pub rst_seen: bool,
    #[serde(skip)]
    pub tls_parse_attempted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tcp_handshake_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<FlowStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_pod: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dst_pod: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dst_namespace: Option<String>,
    pub is_agent_traffic: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traffic_category: Option<String>,
}

impl Flow {
    /// Creates a flow oriented after the first packet of the conversation.
    pub fn new(src_ip: &str, src_port: u16, dst_ip: &str, dst_port: u16, ts: DateTime<Utc>) -> Self {
        Self {
            id: new_flow_id(),
            key: flow_key(src_ip, src_port, dst_ip, dst_port),
            src_ip: src_ip.to_string(),
            src_port,
            dst_ip: dst_ip.to_string(),
            dst_port,
            protocol: Protocol::Tcp,
            first_seen: ts,
            last_seen: ts,
            syn_time: None,
            syn_ack_time: None,
            first_data_time: None,
            bytes_sent: 0,
            bytes_received: 0,
            packets_sent: 0,
            packets_received: 0,
            client_payload: Vec::new(),
            server_payload: Vec::new(),
            fin_seen: false,
            rst_seen: false,
            tls_parse_attempted: false,
            http: None,
            tls: None,
            duration_ms: None,
            tcp_handshake_ms: None,
            status: None,
            src_pod: None,
            src_namespace: None,
            dst_pod: None,
            dst_namespace: None,
            is_agent_traffic: false,
            traffic_category: None,
        }
    }

    /// Whether a packet with this source belongs to the client-to-server direction.
    pub fn is_from_client(&self, src_ip: &str, src_port: u16) -> bool {
        self.src_ip == src_ip && self.src_port == src_port
    }

    /// Accounts a data-bearing packet: counters on the matching side and
    /// payload appended to the matching buffer, capped at [`MAX_PAYLOAD_BYTES`].
    /// The payload is copied; the caller may reuse its receive buffer.
    pub fn record_payload(&mut self, from_client: bool, payload: &[u8], ts: DateTime<Utc>) {
        if payload.is_empty() {
            return;
        }
        if self.first_data_time.is_none() {
            self.first_data_time = Some(ts);
        }
        let (bytes, packets, buf) = if from_client {
            (&mut self.bytes_sent, &mut self.packets_sent, &mut self.client_payload)
        } else {
            (&mut self.bytes_received, &mut self.packets_received, &mut self.server_payload)
        };
        *bytes += payload.len() as u64;
        *packets += 1;
        let room = MAX_PAYLOAD_BYTES.saturating_sub(buf.len());
        if room > 0 {
            let take = payload.len().min(room);
            buf.extend_from_slice(&payload[..take]);
        }
    }

    /// Fills the derived completion attributes.
    ///
    /// Status precedence: RESET if an RST was seen, else CLOSED if a FIN was
    /// seen after the handshake completed, else TIMEOUT. Handshake latency is
    /// only reported when both SYN and SYN+ACK were observed.
    pub fn finalize(&mut self) {
        let duration = self.last_seen - self.first_seen;
        self.duration_ms = Some(duration.num_milliseconds());
        if let (Some(syn), Some(syn_ack)) = (self.syn_time, self.syn_ack_time) {
            let delta = syn_ack - syn;
            let ms = delta
                .num_microseconds()
                .map_or_else(|| delta.num_milliseconds() as f64, |us| us as f64 / 1000.0);
            self.tcp_handshake_ms = Some(ms);
        }
        self.status = Some(if self.rst_seen {
            FlowStatus::Reset
        } else if self.fin_seen && self.syn_ack_time.is_some() {
            FlowStatus::Closed
        } else {
            FlowStatus::Timeout
        });
    }
}

/// Direction-independent identity of a 4-tuple.
///
/// The two endpoints are ordered lexicographically (IP string first, port as
/// tie-break) so that `flow_key(a, b) == flow_key(b, a)`; without this the
/// same conversation would split across two entries.
pub fn flow_key(src_ip: &str, src_port: u16, dst_ip: &str, dst_port: u16) -> String {
    let a = (src_ip, src_port);
    let b = (dst_ip, dst_port);
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{}:{}-{}:{}", lo.0, lo.1, hi.0, hi.1)
}

/// Generates a stable 8-character opaque flow identifier.
pub fn new_flow_id() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect()
}
