#![forbid(unsafe_code)]

use std::sync::Arc;

use chrono::Utc;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use podscope_agent::capture::ChunkSink;
use podscope_agent::{
    AgentConfig, CaptureLoop, FlowSink, FlowTable, HubClient, PodIdentity, HEARTBEAT_INTERVAL,
};
use podscope_common::api::AgentInfo;

#[tokio::main]
async fn main() {
    init_tracing();

    let cfg = AgentConfig::parse();
    info!(interface = %cfg.interface, hub = %cfg.hub_address, agent = %cfg.agent_id, "starting agent");
    if let Err(err) = run(cfg).await {
        error!(%err, "agent exited with error");
        std::process::exit(1);
    }
}

async fn run(cfg: AgentConfig) -> podscope_agent::Result<()> {
    let token = CancellationToken::new();

    let capture = CaptureLoop::new(&cfg.interface, &cfg.bpf_filter);
    let filter = capture.filter_control();

    let info = AgentInfo {
        id: cfg.agent_id.clone(),
        interface: cfg.interface.clone(),
        pod_name: cfg.pod_name.clone(),
        pod_namespace: cfg.pod_namespace.clone(),
        pod_ip: cfg.pod_ip.clone(),
        started_at: Utc::now(),
    };
    let hub = HubClient::spawn(
        &cfg.hub_base_url(),
        info,
        &cfg.bpf_filter,
        HEARTBEAT_INTERVAL,
        Arc::new(move |expr| filter.update(expr)),
    )?;
    if let Err(err) = hub.connect().await {
        warn!(error = %err, "hub not reachable yet, will keep trying");
    }

    let sink: FlowSink = {
        let hub = Arc::clone(&hub);
        Arc::new(move |flow| {
            if let Err(err) = hub.send_flow(flow) {
                warn!(error = %err, "dropping completed flow");
            }
        })
    };
    let table = Arc::new(
        FlowTable::new(sink)
            .with_hub_endpoint(&cfg.hub_address)
            .with_pod_identity(PodIdentity {
                name: cfg.pod_name.clone(),
                namespace: cfg.pod_namespace.clone(),
                ip: cfg.pod_ip.clone(),
            }),
    );
    let cleanup = table.spawn_cleanup(token.clone());

    let chunks: ChunkSink = {
        let hub = Arc::clone(&hub);
        Arc::new(move |bytes: &[u8]| {
            if let Err(err) = hub.send_pcap_chunk(bytes) {
                warn!(error = %err, dropped = bytes.len(), "dropping pcap chunk");
            }
        })
    };

    let mut capture_task = tokio::spawn(capture.run(Arc::clone(&table), chunks, token.clone()));

    let outcome = tokio::select! {
        _ = wait_for_shutdown() => {
            info!("shutdown signal received, stopping");
            token.cancel();
            (&mut capture_task).await
        }
        joined = &mut capture_task => {
            token.cancel();
            joined
        }
    };

    let _ = cleanup.await;
    hub.close().await;

    match outcome {
        Ok(res) => res,
        Err(e) => {
            warn!(error = %e, "capture task join failed");
            Ok(())
        }
    }
}

async fn wait_for_shutdown() {
    let ctrl_c = tokio::signal::ctrl_c();
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "failed to install SIGTERM handler");
            let _ = ctrl_c.await;
        }
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}
