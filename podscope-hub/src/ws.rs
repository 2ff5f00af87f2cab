//! WebSocket fanout endpoint.
//!
//! Each connection gets a writer task fed from its bounded session queue;
//! the shared batch ticker owns the write path for batch frames. Client
//! frames are read and discarded, serving only to detect disconnection.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info};

use crate::session::Session;

pub async fn ws_handler(
    State(session): State<Arc<Session>>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| client_session(session, socket))
}

async fn client_session(session: Arc<Session>, socket: WebSocket) {
    let (id, mut outbound) = session.register_client();
    info!(client = id, "websocket client connected");

    let (mut sink, mut stream) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(text) = outbound.recv().await {
            if sink.send(Message::Text(text.as_ref().into())).await.is_err() {
                break;
            }
        }
        // Closing the sink ends the peer's read loop as well.
        let _ = sink.close().await;
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {} // discarded
        }
    }

    session.unregister_client(id);
    let _ = writer.await;
    info!(client = id, "websocket client disconnected");
    debug!(clients = session.client_count(), "active websocket clients");
}
