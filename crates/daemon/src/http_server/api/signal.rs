use std::convert::Infallible;

use axum::extract::{Json, Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{error_response, parse_share_id, InvalidShareId};
use crate::signaling::{SignalError, SignalKind, SignalMessage, SignalSubscription};
use crate::ServiceState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayResponse {
    /// Subscribers the message reached
    pub delivered: usize,
}

/// Server-sent event stream of signaling messages for a share.
///  Each event is named after the message type and carries the raw payload.
pub async fn subscribe_handler(
    State(state): State<ServiceState>,
    Path(share_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, SignalRequestError> {
    let share_id = parse_share_id(&share_id)?;
    let subscription = state.signaling().subscribe(&share_id);
    tracing::debug!(share_id = %share_id, "signal subscriber attached");

    Ok(Sse::new(events(subscription)).keep_alive(KeepAlive::default()))
}

fn events(subscription: SignalSubscription) -> impl Stream<Item = Result<Event, Infallible>> {
    futures::stream::unfold(subscription, |mut subscription| async move {
        loop {
            let message = subscription.recv().await?;
            match to_event(&message) {
                Some(event) => return Some((Ok(event), subscription)),
                None => tracing::warn!("dropping signal that failed to serialize"),
            }
        }
    })
}

fn to_event(message: &SignalMessage) -> Option<Event> {
    Event::default()
        .event(kind_name(message.kind))
        .json_data(&message.payload)
        .ok()
}

fn kind_name(kind: SignalKind) -> &'static str {
    match kind {
        SignalKind::Offer => "offer",
        SignalKind::Answer => "answer",
        SignalKind::Candidate => "candidate",
    }
}

/// Relay one signaling message to everyone subscribed to the share
pub async fn relay_handler(
    State(state): State<ServiceState>,
    Path(share_id): Path<String>,
    Json(payload): Json<Value>,
) -> Result<impl IntoResponse, SignalRequestError> {
    let share_id = parse_share_id(&share_id)?;
    let message = SignalMessage::parse(payload)?;
    let delivered = state.signaling().relay(&share_id, message);
    tracing::debug!(share_id = %share_id, delivered, "relayed signal");
    Ok(Json(RelayResponse { delivered }))
}

#[derive(Debug, thiserror::Error)]
pub enum SignalRequestError {
    #[error(transparent)]
    InvalidShareId(#[from] InvalidShareId),
    #[error(transparent)]
    Signal(#[from] SignalError),
}

impl IntoResponse for SignalRequestError {
    fn into_response(self) -> Response {
        match self {
            SignalRequestError::InvalidShareId(e) => e.into_response(),
            SignalRequestError::Signal(e) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use serde_json::json;

    use common::prelude::ShareId;

    use super::*;
    use crate::signaling::SignalingHub;

    #[tokio::test]
    async fn test_events_follow_relayed_messages() {
        let hub = SignalingHub::new();
        let id = ShareId::parse("peer").unwrap();
        let stream = events(hub.subscribe(&id));
        futures::pin_mut!(stream);

        let message = SignalMessage::parse(json!({"type": "offer", "sdp": "v=0"})).unwrap();
        assert_eq!(hub.relay(&id, message), 1);

        let event = stream.next().await.unwrap();
        assert!(event.is_ok());
    }

    #[test]
    fn test_kind_names_match_wire_names() {
        for kind in [SignalKind::Offer, SignalKind::Answer, SignalKind::Candidate] {
            assert_eq!(
                serde_json::to_value(kind).unwrap(),
                Value::String(kind_name(kind).to_string())
            );
        }
    }
}
