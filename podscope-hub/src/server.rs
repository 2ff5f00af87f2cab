//! HTTP surface of the session hub.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::warn;

use podscope_common::api::{
    AgentInfo, AgentsResponse, BpfFilterRequest, BpfFilterResponse, BpfFilterState, ErrorResponse,
    FlowsResponse, PauseRequest, PauseState, ResetResponse, StatusResponse,
};
use podscope_common::flow::Flow;

use crate::session::Session;
use crate::ws;

pub fn router(session: Arc<Session>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/flows", get(get_flows).post(post_flow))
        .route("/api/flows/ws", get(ws::ws_handler))
        .route("/api/pcap", get(download_pcap))
        .route("/api/pcap/upload", post(upload_pcap))
        .route("/api/pcap/reset", post(reset_pcap))
        .route("/api/pause", get(get_pause).post(post_pause))
        .route("/api/bpf-filter", get(get_bpf_filter).post(post_bpf_filter))
        .route("/api/agents", get(list_agents).post(register_agent))
        .route("/api/stats", get(stats))
        .with_state(session)
}

async fn health(State(session): State<Arc<Session>>) -> Response {
    Json(session.health()).into_response()
}

async fn get_flows(State(session): State<Arc<Session>>) -> Response {
    let flows = session.ring.get_all();
    let count = flows.len();
    Json(FlowsResponse {
        flows,
        count,
        capacity: session.ring.capacity(),
    })
    .into_response()
}

async fn post_flow(
    State(session): State<Arc<Session>>,
    payload: Result<Json<Flow>, JsonRejection>,
) -> Response {
    match payload {
        Ok(Json(flow)) => {
            session.add_flow(flow);
            (
                StatusCode::CREATED,
                Json(StatusResponse { status: "ok".to_string() }),
            )
                .into_response()
        }
        Err(rejection) => bad_request("invalid flow payload", &rejection.body_text()),
    }
}

async fn upload_pcap(
    State(session): State<Arc<Session>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // Pause gates pcap ingestion only; the chunk is acknowledged and dropped.
    if session.paused() {
        return StatusCode::OK.into_response();
    }
    let agent_id = headers
        .get("X-Agent-ID")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");
    match session.pcap.write(agent_id, &body) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => {
            warn!(agent = %agent_id, error = %e, "pcap write failed");
            internal_error("pcap write failed", &e.to_string())
        }
    }
}

async fn download_pcap(State(session): State<Arc<Session>>) -> Response {
    match session.pcap.session_pcap() {
        Ok(bytes) => {
            let disposition = format!(
                "attachment; filename=podscope-{}.pcap",
                session.session_id()
            );
            (
                [
                    (header::CONTENT_TYPE, "application/vnd.tcpdump.pcap".to_string()),
                    (header::CONTENT_DISPOSITION, disposition),
                ],
                bytes,
            )
                .into_response()
        }
        Err(e) => internal_error("pcap merge failed", &e.to_string()),
    }
}

async fn reset_pcap(State(session): State<Arc<Session>>) -> Response {
    match session.pcap.reset() {
        Ok(()) => Json(ResetResponse {
            success: true,
            message: "pcap files truncated".to_string(),
        })
        .into_response(),
        Err(e) => internal_error("pcap reset failed", &e.to_string()),
    }
}

async fn get_pause(State(session): State<Arc<Session>>) -> Response {
    Json(PauseState { paused: session.paused() }).into_response()
}

/// POST `/api/pause`: an empty body or an absent `paused` field toggles.
async fn post_pause(State(session): State<Arc<Session>>, body: Bytes) -> Response {
    let requested = if body.is_empty() {
        None
    } else {
        match serde_json::from_slice::<PauseRequest>(&body) {
            Ok(req) => req.paused,
            Err(e) => return bad_request("invalid pause payload", &e.to_string()),
        }
    };
    Json(PauseState { paused: session.set_paused(requested) }).into_response()
}

async fn get_bpf_filter(State(session): State<Arc<Session>>) -> Response {
    Json(BpfFilterState { filter: session.bpf_filter() }).into_response()
}

async fn post_bpf_filter(
    State(session): State<Arc<Session>>,
    payload: Result<Json<BpfFilterRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(req) => req,
        Err(rejection) => return bad_request("invalid filter payload", &rejection.body_text()),
    };
    // The empty expression means "no filter" and needs no validation.
    if !req.filter.is_empty() {
        if let Err(e) = validate_bpf(&req.filter) {
            warn!(filter = %req.filter, error = %e, "rejecting bpf filter");
            return bad_request("invalid BPF filter", &e);
        }
    }
    session.set_bpf_filter(req.filter.clone());
    Json(BpfFilterResponse {
        success: true,
        filter: req.filter,
        message: "filter updated; agents apply it on their next heartbeat".to_string(),
    })
    .into_response()
}

async fn register_agent(
    State(session): State<Arc<Session>>,
    payload: Result<Json<AgentInfo>, JsonRejection>,
) -> Response {
    match payload {
        Ok(Json(info)) => {
            session.register_agent(info);
            Json(StatusResponse { status: "registered".to_string() }).into_response()
        }
        Err(rejection) => bad_request("invalid agent payload", &rejection.body_text()),
    }
}

async fn list_agents(State(session): State<Arc<Session>>) -> Response {
    let agents = session.agents();
    let count = agents.len();
    Json(AgentsResponse { agents, count }).into_response()
}

async fn stats(State(session): State<Arc<Session>>) -> Response {
    Json(session.stats()).into_response()
}

/// Compiles the expression against the capture link-type in isolation, so a
/// bad filter is rejected before any agent sees it.
fn validate_bpf(expr: &str) -> Result<(), String> {
    let cap = pcap::Capture::dead(pcap::Linktype::ETHERNET).map_err(|e| e.to_string())?;
    cap.compile(expr, true).map(|_| ()).map_err(|e| e.to_string())
}

fn bad_request(message: &str, error: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            success: false,
            error: error.to_string(),
            message: message.to_string(),
        }),
    )
        .into_response()
}

fn internal_error(message: &str, error: &str) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            success: false,
            error: error.to_string(),
            message: message.to_string(),
        }),
    )
        .into_response()
}
