//! Live job feed over WebSocket.

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use super::AppState;
use crate::jobs::service::JobService;

pub(super) async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    info!("WebSocket client connecting");
    ws.on_upgrade(|socket| handle_socket(socket, state.service))
}

async fn handle_socket(mut socket: WebSocket, service: JobService) {
    info!("WebSocket client connected");

    // Subscribe before the snapshot so nothing falls between the two
    let mut rx = service.subscribe();

    if !send_sync(&mut socket, &service).await {
        warn!("Failed to send initial sync, client disconnected");
        return;
    }

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        if let Ok(json) = serde_json::to_string(&event) {
                            if socket.send(Message::Text(json.into())).await.is_err() {
                                debug!("Client disconnected during send");
                                break;
                            }
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!(missed = n, "WS client lagged behind job events");
                        if !send_sync(&mut socket, &service).await {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => {
                        debug!("Job event channel closed");
                        break;
                    }
                }
            }

            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("WebSocket client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    // The feed is read-only
                    _ => {}
                }
            }
        }
    }

    info!("WebSocket connection closed");
}

/// Send every job as one `jobs_sync` message. Returns `false` if the client is gone.
async fn send_sync(socket: &mut WebSocket, service: &JobService) -> bool {
    let jobs = match service.list().await {
        Ok(jobs) => jobs,
        Err(e) => {
            warn!(error = %e, "Failed to load jobs for sync");
            Vec::new()
        }
    };
    let sync = serde_json::json!({ "type": "jobs_sync", "jobs": jobs });
    socket
        .send(Message::Text(sync.to_string().into()))
        .await
        .is_ok()
}
