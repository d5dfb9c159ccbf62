use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use serde_json::json;

use common::prelude::{ProgressEvent, ShareId};

use super::{error_response, parse_share_id};
use crate::progress::{ProgressBroadcaster, Subscription};
use crate::ServiceState;

/// Text frame a client sends to end the stream early
const CLOSE_COMMAND: &str = "close";

/// Live upload progress for one share. The listener is registered before
///  the upgrade so nothing published in between is missed.
pub async fn handler(
    State(state): State<ServiceState>,
    Path(share_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    let share_id = match share_id.as_str() {
        "" | "null" => None,
        raw => parse_share_id(raw).ok(),
    };
    let Some(share_id) = share_id else {
        return error_response(StatusCode::BAD_REQUEST, "invalid share id");
    };

    let progress = state.progress().clone();
    let subscription = progress.subscribe(&share_id);
    ws.on_upgrade(move |socket| stream_progress(socket, progress, subscription))
}

async fn stream_progress(
    mut socket: WebSocket,
    progress: ProgressBroadcaster,
    mut subscription: Subscription,
) {
    let share_id: ShareId = subscription.share_id.clone();
    tracing::debug!(share_id = %share_id, "progress socket opened");

    loop {
        tokio::select! {
            event = subscription.events.recv() => {
                let Some(event) = event else { break };
                if socket.send(Message::Text(frame(&event))).await.is_err() {
                    break;
                }
                if event.is_complete() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) if text.trim() == CLOSE_COMMAND => break,
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    progress.unsubscribe(&share_id, subscription.id);
    let _ = socket.send(Message::Close(None)).await;
    tracing::debug!(share_id = %share_id, "progress socket closed");
}

fn frame(event: &ProgressEvent) -> String {
    json!({ "progress": event.percent, "status": event.status }).to_string()
}
