//! Bidirectional TCP flow tracking.
//!
//! One mutex guards the whole flow map; packets for a given flow are
//! therefore processed in arrival order. Completed flows are handed to an
//! injected sink outside the critical section.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use podscope_common::flow::{flow_key, Flow};

use crate::protocol;

/// Flows idle longer than this are completed with TIMEOUT.
pub const FLOW_IDLE_TIMEOUT: Duration = Duration::seconds(30);
/// Scan granularity of the cleanup task.
pub const CLEANUP_INTERVAL: StdDuration = StdDuration::from_secs(10);

/// TCP flags of one segment, as seen by the capture loop.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpFlags {
    pub syn: bool,
    pub ack: bool,
    pub fin: bool,
    pub rst: bool,
}

/// Receives each completed flow exactly once.
pub type FlowSink = Arc<dyn Fn(Flow) + Send + Sync>;

/// Identity of the workload this agent is attached to, used to associate
/// flow endpoints with pod names.
#[derive(Debug, Clone, Default)]
pub struct PodIdentity {
    pub name: Option<String>,
    pub namespace: Option<String>,
    pub ip: Option<String>,
}

pub struct FlowTable {
    flows: Mutex<HashMap<String, Flow>>,
    sink: FlowSink,
    /// Endpoints (`ip:port`) whose traffic is the agent's own hub chatter.
    hub_endpoint: Option<String>,
    pod: PodIdentity,
}

impl FlowTable {
    pub fn new(sink: FlowSink) -> Self {
        Self {
            flows: Mutex::new(HashMap::new()),
            sink,
            hub_endpoint: None,
            pod: PodIdentity::default(),
        }
    }

    /// Marks flows touching this `host:port` as agent traffic so views can
    /// filter out the observer's own chatter.
    pub fn with_hub_endpoint(mut self, endpoint: &str) -> Self {
        if !endpoint.is_empty() {
            self.hub_endpoint = Some(endpoint.to_string());
        }
        self
    }

    pub fn with_pod_identity(mut self, pod: PodIdentity) -> Self {
        self.pod = pod;
        self
    }

    /// Feeds one TCP segment into the table.
    ///
    /// The flow's canonical orientation is the direction of the first packet
    /// seen for its key. Payload bytes are copied into the per-direction
    /// buffers; the caller may reuse its receive buffer.
    pub fn process_packet(
        &self,
        src_ip: &str,
        dst_ip: &str,
        src_port: u16,
        dst_port: u16,
        flags: TcpFlags,
        ts: DateTime<Utc>,
        payload: &[u8],
    ) {
        let key = flow_key(src_ip, src_port, dst_ip, dst_port);
        let completed = {
            let mut flows = self.lock();
            let flow = flows.entry(key.clone()).or_insert_with(|| {
                let mut flow = Flow::new(src_ip, src_port, dst_ip, dst_port, ts);
                self.associate(&mut flow);
                debug!(id = %flow.id, key = %flow.key, "new flow");
                flow
            });
            flow.last_seen = ts;

            if flags.syn && !flags.ack && flow.syn_time.is_none() {
                flow.syn_time = Some(ts);
            }
            if flags.syn && flags.ack && flow.syn_ack_time.is_none() {
                flow.syn_ack_time = Some(ts);
            }
            if flags.fin {
                flow.fin_seen = true;
            }

            if flags.rst {
                flow.rst_seen = true;
                flows.remove(&key)
            } else {
                let from_client = flow.is_from_client(src_ip, src_port);
                flow.record_payload(from_client, payload, ts);
                if !payload.is_empty() {
                    protocol::advance(flow);
                }
                if flow.fin_seen && flow.syn_ack_time.is_some() {
                    flows.remove(&key)
                } else {
                    None
                }
            }
        };
        if let Some(flow) = completed {
            self.emit(flow);
        }
    }

    /// Completes every flow idle longer than [`FLOW_IDLE_TIMEOUT`].
    ///
    /// Completion consumes the map entry, so racing a timeout against a
    /// FIN/RST completion is harmless: whoever removes the entry first emits
    /// the flow, and the other path finds nothing.
    pub fn expire_idle(&self, now: DateTime<Utc>) {
        let expired: Vec<Flow> = {
            let mut flows = self.lock();
            let stale: Vec<String> = flows
                .iter()
                .filter(|(_, f)| now - f.last_seen > FLOW_IDLE_TIMEOUT)
                .map(|(k, _)| k.clone())
                .collect();
            stale.into_iter().filter_map(|k| flows.remove(&k)).collect()
        };
        for flow in expired {
            self.emit(flow);
        }
    }

    /// Ticks [`expire_idle`] until cancelled.
    pub fn spawn_cleanup(self: &Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        let table = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => table.expire_idle(Utc::now()),
                }
            }
            info!(active = table.len(), "flow cleanup task stopped");
        })
    }

    /// Number of active (incomplete) flows.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Snapshot of one active flow, for inspection.
    pub fn get(&self, key: &str) -> Option<Flow> {
        self.lock().get(key).cloned()
    }

    fn emit(&self, mut flow: Flow) {
        flow.finalize();
        debug!(id = %flow.id, status = ?flow.status, "flow completed");
        (self.sink)(flow);
    }

    fn associate(&self, flow: &mut Flow) {
        if let Some(hub) = &self.hub_endpoint {
            let src = format!("{}:{}", flow.src_ip, flow.src_port);
            let dst = format!("{}:{}", flow.dst_ip, flow.dst_port);
            if &src == hub || &dst == hub {
                flow.is_agent_traffic = true;
                flow.traffic_category = Some("agent-hub".to_string());
            }
        }
        if let Some(pod_ip) = &self.pod.ip {
            if &flow.src_ip == pod_ip {
                flow.src_pod = self.pod.name.clone();
                flow.src_namespace = self.pod.namespace.clone();
            }
            if &flow.dst_ip == pod_ip {
                flow.dst_pod = self.pod.name.clone();
                flow.dst_namespace = self.pod.namespace.clone();
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Flow>> {
        self.flows.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
