//! Live capture loop: packets in, flow-table updates and pcap bytes out.

pub mod buffer;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use etherparse::{NetSlice, SlicedPacket, TransportSlice};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::flow_table::{FlowTable, TcpFlags};
use buffer::PcapBuffer;

const SNAPLEN: i32 = 65_535;
/// Poll timeout on the blocking read so cancellation and filter updates are
/// observed promptly even on a quiet interface.
const READ_TIMEOUT_MS: i32 = 500;
/// Cadence of the rolling-buffer flush toward the hub.
const FLUSH_INTERVAL: Duration = Duration::from_millis(500);

/// Receives each swapped-out pcap chunk.
pub type ChunkSink = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Per-interface packet counters. Kernel-side drop counters come from the
/// capture handle and are logged at shutdown.
#[derive(Debug, Default)]
pub struct CaptureStats {
    pub packets_total: AtomicU64,
    pub tcp_packets: AtomicU64,
    pub udp_packets: AtomicU64,
    pub other_packets: AtomicU64,
}

impl CaptureStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Requested-vs-applied BPF filter state.
///
/// `update` runs on whatever task the hub client heartbeat uses; the capture
/// thread picks pending expressions up between reads and only commits an
/// expression once the handle accepted it, so a failed compile leaves the
/// previous filter in effect.
pub struct FilterControl {
    default_expr: String,
    state: Mutex<FilterState>,
}

struct FilterState {
    current: String,
    pending: Option<String>,
}

impl FilterControl {
    fn new(default_expr: &str) -> Self {
        Self {
            default_expr: default_expr.to_string(),
            state: Mutex::new(FilterState {
                current: default_expr.to_string(),
                pending: None,
            }),
        }
    }

    /// Requests a filter change; the empty string resets to the configured
    /// default. Requesting the currently applied expression is a no-op.
    pub fn update(&self, expr: &str) {
        let effective = if expr.is_empty() { self.default_expr.as_str() } else { expr };
        let mut state = self.lock();
        if state.current == effective {
            debug!(filter = %effective, "bpf filter unchanged");
            return;
        }
        info!(filter = %effective, "bpf filter update requested");
        state.pending = Some(effective.to_string());
    }

    /// Currently applied expression.
    pub fn current(&self) -> String {
        self.lock().current.clone()
    }

    fn take_pending(&self) -> Option<String> {
        self.lock().pending.take()
    }

    fn commit(&self, expr: String) {
        self.lock().current = expr;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FilterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct CaptureLoop {
    interface: String,
    buffer: Arc<PcapBuffer>,
    stats: Arc<CaptureStats>,
    filter: Arc<FilterControl>,
}

impl CaptureLoop {
    pub fn new(interface: &str, default_filter: &str) -> Self {
        Self {
            interface: interface.to_string(),
            buffer: Arc::new(PcapBuffer::new()),
            stats: Arc::new(CaptureStats::default()),
            filter: Arc::new(FilterControl::new(default_filter)),
        }
    }

    /// Handle through which the hub client applies filter updates.
    pub fn filter_control(&self) -> Arc<FilterControl> {
        Arc::clone(&self.filter)
    }

    pub fn stats(&self) -> Arc<CaptureStats> {
        Arc::clone(&self.stats)
    }

    /// Opens the interface and pumps packets until `token` is cancelled.
    ///
    /// Failing to open the interface or to apply the initial filter is fatal
    /// and propagates; everything after that is best-effort. The rolling
    /// buffer is flushed every 500 ms and once more after the pump stops.
    pub async fn run(self, table: Arc<FlowTable>, chunks: ChunkSink, token: CancellationToken) -> Result<()> {
        let mut cap = pcap::Capture::from_device(self.interface.as_str())?
            .promisc(true)
            .snaplen(SNAPLEN)
            .immediate_mode(true)
            .timeout(READ_TIMEOUT_MS)
            .open()?;

        let initial = self.filter.current();
        if !initial.is_empty() {
            cap.filter(&initial, true)?;
        }
        info!(interface = %self.interface, filter = %initial, "capture started");

        let flush_token = CancellationToken::new();
        let flush_task = tokio::spawn(flush_loop(
            Arc::clone(&self.buffer),
            Arc::clone(&chunks),
            flush_token.clone(),
        ));

        let buffer = Arc::clone(&self.buffer);
        let stats = Arc::clone(&self.stats);
        let filter = Arc::clone(&self.filter);
        let pump_token = token.clone();
        let pump = tokio::task::spawn_blocking(move || {
            pump_packets(cap, &table, &buffer, &stats, &filter, &pump_token)
        });
        let pump_result = pump.await;

        // Stop the ticker only after the pump stopped appending, so the
        // final flush drains everything.
        flush_token.cancel();
        let _ = flush_task.await;

        match pump_result {
            Ok(res) => res,
            Err(e) => {
                warn!(error = %e, "capture pump task panicked");
                Ok(())
            }
        }
    }
}

async fn flush_loop(buffer: Arc<PcapBuffer>, chunks: ChunkSink, token: CancellationToken) {
    let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => flush_once(&buffer, &chunks),
        }
    }
    flush_once(&buffer, &chunks);
}

fn flush_once(buffer: &PcapBuffer, chunks: &ChunkSink) {
    let bytes = buffer.take();
    if !bytes.is_empty() {
        chunks(&bytes);
    }
}

/// Blocking read loop; returns when the token is cancelled or the handle
/// reports a terminal error.
fn pump_packets(
    mut cap: pcap::Capture<pcap::Active>,
    table: &FlowTable,
    buffer: &PcapBuffer,
    stats: &CaptureStats,
    filter: &FilterControl,
    token: &CancellationToken,
) -> Result<()> {
    loop {
        if token.is_cancelled() {
            break;
        }
        if let Some(expr) = filter.take_pending() {
            match cap.filter(&expr, true) {
                Ok(()) => {
                    info!(filter = %expr, "bpf filter applied");
                    filter.commit(expr);
                }
                Err(e) => warn!(filter = %expr, error = %e, "bpf filter rejected, keeping previous"),
            }
        }
        match cap.next_packet() {
            Ok(packet) => {
                let ts = packet_time(&packet);
                CaptureStats::bump(&stats.packets_total);
                buffer.append_packet(packet.data, ts);
                dispatch(table, stats, packet.data, ts);
            }
            Err(pcap::Error::TimeoutExpired) => continue,
            Err(pcap::Error::NoMorePackets) => break,
            Err(e) => {
                warn!(error = %e, "capture read failed");
                break;
            }
        }
    }

    if let Ok(pcap_stats) = cap.stats() {
        info!(
            received = pcap_stats.received,
            dropped = pcap_stats.dropped,
            if_dropped = pcap_stats.if_dropped,
            tcp = stats.tcp_packets.load(Ordering::Relaxed),
            udp = stats.udp_packets.load(Ordering::Relaxed),
            "capture stopped"
        );
    }
    Ok(())
}

/// Slices the frame and feeds TCP segments to the flow table. UDP is counted
/// but otherwise ignored; anything unparseable counts as "other".
fn dispatch(table: &FlowTable, stats: &CaptureStats, frame: &[u8], ts: DateTime<Utc>) {
    let Ok(sliced) = SlicedPacket::from_ethernet(frame) else {
        CaptureStats::bump(&stats.other_packets);
        return;
    };
    let (src_ip, dst_ip) = match &sliced.net {
        Some(NetSlice::Ipv4(v4)) => (
            v4.header().source_addr().to_string(),
            v4.header().destination_addr().to_string(),
        ),
        Some(NetSlice::Ipv6(v6)) => (
            v6.header().source_addr().to_string(),
            v6.header().destination_addr().to_string(),
        ),
        _ => {
            CaptureStats::bump(&stats.other_packets);
            return;
        }
    };
    match &sliced.transport {
        Some(TransportSlice::Tcp(tcp)) => {
            CaptureStats::bump(&stats.tcp_packets);
            let flags = TcpFlags {
                syn: tcp.syn(),
                ack: tcp.ack(),
                fin: tcp.fin(),
                rst: tcp.rst(),
            };
            table.process_packet(
                &src_ip,
                &dst_ip,
                tcp.source_port(),
                tcp.destination_port(),
                flags,
                ts,
                tcp.payload(),
            );
        }
        Some(TransportSlice::Udp(_)) => CaptureStats::bump(&stats.udp_packets),
        _ => CaptureStats::bump(&stats.other_packets),
    }
}

fn packet_time(packet: &pcap::Packet<'_>) -> DateTime<Utc> {
    let secs = packet.header.ts.tv_sec as i64;
    let nanos = (packet.header.ts.tv_usec as u32).saturating_mul(1000);
    Utc.timestamp_opt(secs, nanos)
        .single()
        .unwrap_or_else(Utc::now)
}
