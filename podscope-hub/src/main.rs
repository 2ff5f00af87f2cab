#![forbid(unsafe_code)]

use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use podscope_hub::{router, HubConfig, Session};

#[tokio::main]
async fn main() {
    init_tracing();

    let cfg = HubConfig::parse();
    info!(listen = %cfg.listen, session = %cfg.session_id, max_flows = cfg.max_flows, "starting hub");
    if let Err(err) = run(cfg).await {
        error!(%err, "hub exited with error");
        std::process::exit(1);
    }
}

async fn run(cfg: HubConfig) -> podscope_hub::Result<()> {
    let session = Session::new(&cfg)?;
    let token = CancellationToken::new();
    let ticker = session.spawn_batch_ticker(
        Duration::from_millis(cfg.ws_batch_interval_ms),
        token.clone(),
    );

    let listener = TcpListener::bind(cfg.listen).await?;
    info!(addr = %cfg.listen, "hub listening");

    let app = router(session.clone());
    let shutdown_token = token.clone();
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            wait_for_shutdown().await;
            info!("shutdown signal received, stopping");
            shutdown_token.cancel();
        })
        .await?;

    let _ = ticker.await;
    session.pcap.close();
    info!("hub stopped");
    Ok(())
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
