//! Buffered HTTP client toward the session hub.
//!
//! Flow records and pcap chunks go through bounded queues drained by worker
//! tasks; senders never block and never retry. The heartbeat doubles as the
//! control-plane pull: a changed `bpfFilter` in the health body is pushed
//! into the capture loop through an injected capability, which keeps this
//! module free of any dependency on the capture machinery.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use podscope_common::api::{AgentInfo, HealthResponse};
use podscope_common::flow::Flow;

use crate::error::{AgentError, Result};

/// Queue depth for completed flows.
pub const FLOW_QUEUE_CAPACITY: usize = 1000;
/// Queue depth for pcap chunks.
pub const PCAP_QUEUE_CAPACITY: usize = 100;
/// Default heartbeat cadence.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
/// Per-request timeout on every hub call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Applies a hub-published BPF expression to the capture loop.
pub type FilterUpdate = Arc<dyn Fn(&str) + Send + Sync>;

pub struct HubClient {
    base_url: String,
    info: AgentInfo,
    http: reqwest::Client,
    flows_tx: mpsc::Sender<Flow>,
    pcap_tx: mpsc::Sender<Vec<u8>>,
    connected: AtomicBool,
    last_filter: Mutex<String>,
    on_filter_update: FilterUpdate,
    token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl HubClient {
    /// Builds the client and spawns its drain workers and heartbeat.
    ///
    /// `initial_filter` is the expression the capture loop already applied;
    /// the heartbeat only invokes `on_filter_update` when the hub publishes
    /// something different.
    pub fn spawn(
        base_url: &str,
        info: AgentInfo,
        initial_filter: &str,
        heartbeat_interval: Duration,
        on_filter_update: FilterUpdate,
    ) -> Result<Arc<Self>> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        let (flows_tx, flows_rx) = mpsc::channel(FLOW_QUEUE_CAPACITY);
        let (pcap_tx, pcap_rx) = mpsc::channel(PCAP_QUEUE_CAPACITY);

        let client = Arc::new(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            info,
            http,
            flows_tx,
            pcap_tx,
            connected: AtomicBool::new(false),
            last_filter: Mutex::new(initial_filter.to_string()),
            on_filter_update,
            token: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });

        let mut tasks = vec![
            tokio::spawn(Arc::clone(&client).flow_worker(flows_rx)),
            tokio::spawn(Arc::clone(&client).pcap_worker(pcap_rx)),
            tokio::spawn(Arc::clone(&client).heartbeat(heartbeat_interval)),
        ];
        client
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .append(&mut tasks);
        Ok(client)
    }

    /// Enqueues a completed flow; fails fast when the queue is full.
    pub fn send_flow(&self, flow: Flow) -> Result<()> {
        self.flows_tx
            .try_send(flow)
            .map_err(|_| AgentError::ChannelFull("flows"))
    }

    /// Copies and enqueues a pcap chunk; fails fast when the queue is full.
    /// The caller may reuse its buffer immediately.
    pub fn send_pcap_chunk(&self, chunk: &[u8]) -> Result<()> {
        self.pcap_tx
            .try_send(chunk.to_vec())
            .map_err(|_| AgentError::ChannelFull("pcap"))
    }

    /// Probes hub health; success marks the client connected and triggers a
    /// best-effort identity registration.
    pub async fn connect(&self) -> Result<()> {
        let resp = self
            .http
            .get(format!("{}/api/health", self.base_url))
            .send()
            .await?;
        if !resp.status().is_success() {
            self.connected.store(false, Ordering::SeqCst);
            return Err(AgentError::Hub(format!("health returned {}", resp.status())));
        }
        self.connected.store(true, Ordering::SeqCst);
        info!(hub = %self.base_url, agent = %self.info.id, "connected to hub");

        match self
            .http
            .post(format!("{}/api/agents", self.base_url))
            .json(&self.info)
            .send()
            .await
        {
            Ok(r) if r.status().is_success() => debug!("agent registered"),
            Ok(r) => warn!(status = %r.status(), "agent registration rejected"),
            Err(e) => warn!(error = %e, "agent registration failed"),
        }
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Cancels the workers and waits for them to finish. Idempotent; every
    /// call after the first returns immediately.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.token.cancel();
        self.connected.store(false, Ordering::SeqCst);
        let tasks = std::mem::take(
            &mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for task in tasks {
            let _ = task.await;
        }
        info!("hub client closed");
    }

    async fn flow_worker(self: Arc<Self>, mut rx: mpsc::Receiver<Flow>) {
        loop {
            let flow = tokio::select! {
                _ = self.token.cancelled() => break,
                item = rx.recv() => match item {
                    Some(flow) => flow,
                    None => break,
                },
            };
            let res = self
                .http
                .post(format!("{}/api/flows", self.base_url))
                .json(&flow)
                .send()
                .await;
            match res {
                Ok(r) if r.status().is_success() => {}
                Ok(r) => warn!(id = %flow.id, status = %r.status(), "flow rejected by hub, dropped"),
                Err(e) => warn!(id = %flow.id, error = %e, "flow delivery failed, dropped"),
            }
        }
    }

    async fn pcap_worker(self: Arc<Self>, mut rx: mpsc::Receiver<Vec<u8>>) {
        loop {
            let chunk = tokio::select! {
                _ = self.token.cancelled() => break,
                item = rx.recv() => match item {
                    Some(chunk) => chunk,
                    None => break,
                },
            };
            let res = self
                .http
                .post(format!("{}/api/pcap/upload", self.base_url))
                .header("Content-Type", "application/octet-stream")
                .header("X-Agent-ID", self.info.id.clone())
                .body(chunk)
                .send()
                .await;
            match res {
                Ok(r) if r.status().is_success() => {}
                Ok(r) => warn!(status = %r.status(), "pcap chunk rejected by hub, dropped"),
                Err(e) => warn!(error = %e, "pcap chunk delivery failed, dropped"),
            }
        }
    }

    async fn heartbeat(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if !self.is_connected() {
                // Best-effort reconnect; the hub may simply not be up yet.
                if let Err(e) = self.connect().await {
                    debug!(error = %e, "hub still unreachable");
                }
                continue;
            }
            match self.fetch_health().await {
                Ok(health) => self.maybe_apply_filter(&health.bpf_filter),
                Err(e) => {
                    warn!(error = %e, "heartbeat failed");
                    self.connected.store(false, Ordering::SeqCst);
                }
            }
        }
    }

    async fn fetch_health(&self) -> Result<HealthResponse> {
        let resp = self
            .http
            .get(format!("{}/api/health", self.base_url))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(AgentError::Hub(format!("health returned {}", resp.status())));
        }
        Ok(resp.json::<HealthResponse>().await?)
    }

    /// Invokes the filter-update capability once per observed change.
    fn maybe_apply_filter(&self, filter: &str) {
        let mut last = self.last_filter.lock().unwrap_or_else(PoisonError::into_inner);
        if *last != filter {
            info!(filter = %filter, "hub published new bpf filter");
            (self.on_filter_update)(filter);
            *last = filter.to_string();
        }
    }
}
