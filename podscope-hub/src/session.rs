//! Session state: the flow ring, the pcap aggregator, and WebSocket fanout.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use podscope_common::api::{AgentInfo, HealthResponse, StatsResponse, WsFrame};
use podscope_common::flow::Flow;

use crate::config::HubConfig;
use crate::error::Result;
use crate::pcap_store::PcapAggregator;
use crate::ring::FlowRing;

/// Outbound frames buffered per WebSocket client. A client that falls this
/// far behind is disconnected instead of slowing everyone else down.
pub const CLIENT_QUEUE_CAPACITY: usize = 64;

/// Everything one capture session owns on the hub side.
pub struct Session {
    session_id: String,
    started: Instant,
    catchup_limit: usize,
    pub ring: FlowRing,
    pub pcap: PcapAggregator,
    clients: Mutex<HashMap<u64, mpsc::Sender<Arc<str>>>>,
    next_client_id: AtomicU64,
    pending: Mutex<Vec<Flow>>,
    paused: RwLock<bool>,
    bpf_filter: RwLock<String>,
    agents: Mutex<HashMap<String, AgentInfo>>,
}

impl Session {
    pub fn new(cfg: &HubConfig) -> Result<Arc<Self>> {
        let pcap = PcapAggregator::new(&cfg.pcap_dir, cfg.pcap_max_bytes)?;
        Ok(Arc::new(Self {
            session_id: cfg.session_id.clone(),
            started: Instant::now(),
            catchup_limit: cfg.ws_catchup_limit,
            ring: FlowRing::new(cfg.max_flows),
            pcap,
            clients: Mutex::new(HashMap::new()),
            next_client_id: AtomicU64::new(1),
            pending: Mutex::new(Vec::new()),
            paused: RwLock::new(false),
            bpf_filter: RwLock::new(String::new()),
            agents: Mutex::new(HashMap::new()),
        }))
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Stores the flow in the ring and queues it for the next batch tick.
    pub fn add_flow(&self, flow: Flow) {
        self.ring.add(flow.clone());
        self.lock(&self.pending).push(flow);
    }

    /// Drains the pending list and fans one batch frame out to every client.
    /// Clients whose queue is full or gone are removed.
    pub fn broadcast_pending(&self) {
        let flows = std::mem::take(&mut *self.lock(&self.pending));
        if flows.is_empty() {
            return;
        }
        let frame = WsFrame::Batch { flows };
        let text = match serde_json::to_string(&frame) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "failed to serialize batch frame");
                return;
            }
        };
        let msg: Arc<str> = text.into();

        let mut dead = Vec::new();
        {
            let clients = self.lock(&self.clients);
            for (&id, tx) in clients.iter() {
                if tx.try_send(Arc::clone(&msg)).is_err() {
                    dead.push(id);
                }
            }
        }
        if !dead.is_empty() {
            let mut clients = self.lock(&self.clients);
            for id in dead {
                clients.remove(&id);
                warn!(client = id, "dropping slow websocket client");
            }
        }
    }

    /// Adds a WebSocket client and returns its outbound frame stream.
    ///
    /// The catch-up frame is queued before the client joins the broadcast
    /// set, so it is always the first frame the client receives.
    pub fn register_client(&self) -> (u64, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(CLIENT_QUEUE_CAPACITY);

        let flows = self.ring.get_recent(self.catchup_limit);
        let total = self.ring.size();
        let frame = WsFrame::Catchup {
            has_more: total > flows.len(),
            total,
            flows,
        };
        match serde_json::to_string(&frame) {
            Ok(text) => {
                let _ = tx.try_send(text.into());
            }
            Err(e) => warn!(error = %e, "failed to serialize catchup frame"),
        }

        let id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        self.lock(&self.clients).insert(id, tx);
        debug!(client = id, "websocket client registered");
        (id, rx)
    }

    pub fn unregister_client(&self, id: u64) {
        self.lock(&self.clients).remove(&id);
    }

    pub fn client_count(&self) -> usize {
        self.lock(&self.clients).len()
    }

    /// Ticks [`Self::broadcast_pending`] until cancelled, then flushes once.
    pub fn spawn_batch_ticker(
        self: &Arc<Self>,
        interval: Duration,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => session.broadcast_pending(),
                }
            }
            session.broadcast_pending();
            info!("batch ticker stopped");
        })
    }

    pub fn paused(&self) -> bool {
        *self.paused.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sets or, on `None`, toggles the pause flag; returns the new state.
    /// Pause suppresses pcap ingestion only; flows keep flowing.
    pub fn set_paused(&self, value: Option<bool>) -> bool {
        let mut paused = self.paused.write().unwrap_or_else(PoisonError::into_inner);
        *paused = value.unwrap_or(!*paused);
        info!(paused = *paused, "pause state changed");
        *paused
    }

    pub fn bpf_filter(&self) -> String {
        self.bpf_filter
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stores an already-validated filter expression for agents to pull.
    pub fn set_bpf_filter(&self, filter: String) {
        info!(filter = %filter, "bpf filter stored");
        *self.bpf_filter.write().unwrap_or_else(PoisonError::into_inner) = filter;
    }

    pub fn register_agent(&self, info: AgentInfo) {
        info!(agent = %info.id, interface = %info.interface, "agent registered");
        self.lock(&self.agents).insert(info.id.clone(), info);
    }

    pub fn agents(&self) -> Vec<AgentInfo> {
        self.lock(&self.agents).values().cloned().collect()
    }

    pub fn health(&self) -> HealthResponse {
        HealthResponse {
            status: "healthy".to_string(),
            session_id: self.session_id.clone(),
            timestamp: Utc::now(),
            bpf_filter: self.bpf_filter(),
        }
    }

    pub fn stats(&self) -> StatsResponse {
        StatsResponse {
            flows: self.ring.size(),
            flow_capacity: self.ring.capacity(),
            ws_clients: self.client_count(),
            pcap_size: self.pcap.total_size(),
            session_id: self.session_id.clone(),
            uptime: self.started.elapsed().as_secs(),
            paused: self.paused(),
        }
    }

    fn lock<'a, T>(&self, m: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
        m.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
