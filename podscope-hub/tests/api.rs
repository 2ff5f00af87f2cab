use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use podscope_common::api::{AgentInfo, FlowsResponse, HealthResponse, StatsResponse};
use podscope_common::flow::Flow;
use podscope_common::pcap::write_global_header;
use podscope_hub::{router, HubConfig, Session};

fn test_config(pcap_dir: PathBuf) -> HubConfig {
    HubConfig {
        listen: "127.0.0.1:0".parse().expect("listen addr"),
        max_flows: 50,
        ws_batch_interval_ms: 150,
        ws_catchup_limit: 200,
        pcap_dir,
        pcap_max_bytes: 1024 * 1024,
        session_id: "itest".to_string(),
    }
}

async fn spawn_hub() -> Result<(SocketAddr, Arc<Session>, tempfile::TempDir), Box<dyn std::error::Error + Send + Sync>>
{
    let dir = tempfile::tempdir()?;
    let session = Session::new(&test_config(dir.path().to_path_buf()))?;
    let app = router(Arc::clone(&session));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app.into_make_service()).await;
    });
    Ok((addr, session, dir))
}

#[tokio::test]
async fn health_carries_session_and_filter() -> Result<(), Box<dyn std::error::Error + Send + Sync>>
{
    let (addr, session, _dir) = spawn_hub().await?;
    let client = reqwest::Client::new();

    let health: HealthResponse = client
        .get(format!("http://{addr}/api/health"))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(health.status, "healthy");
    assert_eq!(health.session_id, "itest");
    assert_eq!(health.bpf_filter, "");

    session.set_bpf_filter("tcp port 80".to_string());
    let health: HealthResponse = client
        .get(format!("http://{addr}/api/health"))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(health.bpf_filter, "tcp port 80");
    Ok(())
}

#[tokio::test]
async fn flows_round_trip_through_the_ring() -> Result<(), Box<dyn std::error::Error + Send + Sync>>
{
    let (addr, _session, _dir) = spawn_hub().await?;
    let client = reqwest::Client::new();

    let flow = Flow::new("10.0.0.1", 40000, "10.0.0.2", 80, Utc::now());
    let resp = client
        .post(format!("http://{addr}/api/flows"))
        .json(&flow)
        .send()
        .await?;
    assert_eq!(resp.status(), reqwest::StatusCode::CREATED);

    let listed: FlowsResponse = client
        .get(format!("http://{addr}/api/flows"))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(listed.count, 1);
    assert_eq!(listed.capacity, 50);
    assert_eq!(listed.flows[0].id, flow.id);

    // A body that is not a flow is rejected without touching state.
    let resp = client
        .post(format!("http://{addr}/api/flows"))
        .header("Content-Type", "application/json")
        .body("{\"nope\": 1}")
        .send()
        .await?;
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: serde_json::Value = resp.json().await?;
    assert_eq!(body["success"], false);
    Ok(())
}

#[tokio::test]
async fn pause_gates_pcap_ingestion_only() -> Result<(), Box<dyn std::error::Error + Send + Sync>>
{
    let (addr, session, _dir) = spawn_hub().await?;
    let client = reqwest::Client::new();

    let mut chunk = Vec::new();
    write_global_header(&mut chunk)?;
    chunk.extend_from_slice(&[0u8; 16]); // one empty record

    // Toggle on via empty POST body.
    let resp: serde_json::Value = client
        .post(format!("http://{addr}/api/pause"))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(resp["paused"], true);

    let resp = client
        .post(format!("http://{addr}/api/pcap/upload"))
        .header("X-Agent-ID", "agent-a")
        .header("Content-Type", "application/octet-stream")
        .body(chunk.clone())
        .send()
        .await?;
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert_eq!(session.pcap.total_size(), 0, "paused upload must be discarded");

    // Flows keep flowing while paused.
    let flow = Flow::new("10.0.0.1", 40000, "10.0.0.2", 80, Utc::now());
    let resp = client
        .post(format!("http://{addr}/api/flows"))
        .json(&flow)
        .send()
        .await?;
    assert_eq!(resp.status(), reqwest::StatusCode::CREATED);

    let resp: serde_json::Value = client
        .post(format!("http://{addr}/api/pause"))
        .json(&serde_json::json!({"paused": false}))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(resp["paused"], false);

    let resp = client
        .post(format!("http://{addr}/api/pcap/upload"))
        .header("X-Agent-ID", "agent-a")
        .header("Content-Type", "application/octet-stream")
        .body(chunk.clone())
        .send()
        .await?;
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert_eq!(session.pcap.total_size(), chunk.len() as u64);
    Ok(())
}

#[tokio::test]
async fn pcap_download_is_a_valid_capture() -> Result<(), Box<dyn std::error::Error + Send + Sync>>
{
    let (addr, _session, _dir) = spawn_hub().await?;
    let client = reqwest::Client::new();

    let mut chunk = Vec::new();
    write_global_header(&mut chunk)?;
    client
        .post(format!("http://{addr}/api/pcap/upload"))
        .header("X-Agent-ID", "agent-a")
        .header("Content-Type", "application/octet-stream")
        .body(chunk)
        .send()
        .await?;

    let resp = client.get(format!("http://{addr}/api/pcap")).send().await?;
    assert_eq!(
        resp.headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok()),
        Some("application/vnd.tcpdump.pcap")
    );
    assert_eq!(
        resp.headers()
            .get("content-disposition")
            .and_then(|v| v.to_str().ok()),
        Some("attachment; filename=podscope-itest.pcap")
    );
    let bytes = resp.bytes().await?;
    assert_eq!(&bytes[..4], &[0xD4, 0xC3, 0xB2, 0xA1]);

    let reset: serde_json::Value = client
        .post(format!("http://{addr}/api/pcap/reset"))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(reset["success"], true);
    Ok(())
}

#[tokio::test]
async fn bpf_filter_is_validated_before_storage(
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (addr, _session, _dir) = spawn_hub().await?;
    let client = reqwest::Client::new();

    let resp: serde_json::Value = client
        .post(format!("http://{addr}/api/bpf-filter"))
        .json(&serde_json::json!({"filter": "tcp port 80"}))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(resp["success"], true);

    // Nonsense is rejected with 400 and does not clobber the stored filter.
    let resp = client
        .post(format!("http://{addr}/api/bpf-filter"))
        .json(&serde_json::json!({"filter": "definitely not bpf !!"}))
        .send()
        .await?;
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: serde_json::Value = resp.json().await?;
    assert_eq!(body["success"], false);

    let current: serde_json::Value = client
        .get(format!("http://{addr}/api/bpf-filter"))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(current["filter"], "tcp port 80");

    // Empty means "no filter" and is always accepted.
    let resp: serde_json::Value = client
        .post(format!("http://{addr}/api/bpf-filter"))
        .json(&serde_json::json!({"filter": ""}))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(resp["success"], true);
    Ok(())
}

#[tokio::test]
async fn agents_register_and_list() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (addr, _session, _dir) = spawn_hub().await?;
    let client = reqwest::Client::new();

    let info = AgentInfo {
        id: "agent-a".to_string(),
        interface: "eth0".to_string(),
        pod_name: Some("checkout-6f7d".to_string()),
        pod_namespace: Some("shop".to_string()),
        pod_ip: Some("10.0.0.7".to_string()),
        started_at: Utc::now(),
    };
    let resp: serde_json::Value = client
        .post(format!("http://{addr}/api/agents"))
        .json(&info)
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(resp["status"], "registered");

    let listed: serde_json::Value = client
        .get(format!("http://{addr}/api/agents"))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(listed["count"], 1);
    assert_eq!(listed["agents"][0]["id"], "agent-a");

    let stats: StatsResponse = client
        .get(format!("http://{addr}/api/stats"))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(stats.session_id, "itest");
    assert_eq!(stats.flow_capacity, 50);
    assert!(!stats.paused);
    Ok(())
}
