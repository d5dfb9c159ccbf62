use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use common::prelude::ShareId;

const CHANNEL_CAPACITY: usize = 64;

/// Kinds of peer connection setup messages the relay accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Offer,
    Answer,
    Candidate,
}

#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    #[error("signal must be a JSON object")]
    NotAnObject,
    #[error("signal type must be one of offer, answer or candidate")]
    UnknownType,
}

/// An opaque signaling payload whose `type` has been checked
#[derive(Debug, Clone, PartialEq)]
pub struct SignalMessage {
    pub kind: SignalKind,
    pub payload: serde_json::Value,
}

impl SignalMessage {
    pub fn parse(payload: serde_json::Value) -> Result<Self, SignalError> {
        let object = payload.as_object().ok_or(SignalError::NotAnObject)?;
        let kind = object
            .get("type")
            .cloned()
            .and_then(|t| serde_json::from_value::<SignalKind>(t).ok())
            .ok_or(SignalError::UnknownType)?;
        Ok(Self { kind, payload })
    }
}

/// Per-share relay between the local peer connection and remote
///  subscribers. Channels exist only while someone is listening.
#[derive(Debug, Clone, Default)]
pub struct SignalingHub {
    channels: Arc<Mutex<HashMap<ShareId, broadcast::Sender<SignalMessage>>>>,
}

/// A live subscription; leaving the hub happens on drop
#[derive(Debug)]
pub struct SignalSubscription {
    hub: SignalingHub,
    share_id: ShareId,
    receiver: broadcast::Receiver<SignalMessage>,
}

impl SignalSubscription {
    /// Next message, skipping over any this subscriber lagged behind on.
    ///  `None` once the channel is gone.
    pub async fn recv(&mut self) -> Option<SignalMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(share_id = %self.share_id, skipped, "signal subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for SignalSubscription {
    fn drop(&mut self) {
        self.hub.release(&self.share_id);
    }
}

impl SignalingHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, share_id: &ShareId) -> SignalSubscription {
        let receiver = self
            .channels
            .lock()
            .entry(share_id.clone())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();

        SignalSubscription {
            hub: self.clone(),
            share_id: share_id.clone(),
            receiver,
        }
    }

    /// Relay a message to current subscribers, returning how many got it
    pub fn relay(&self, share_id: &ShareId, message: SignalMessage) -> usize {
        let channels = self.channels.lock();
        match channels.get(share_id) {
            Some(tx) => tx.send(message).unwrap_or(0),
            None => 0,
        }
    }

    pub fn subscriber_count(&self, share_id: &ShareId) -> usize {
        self.channels
            .lock()
            .get(share_id)
            .map(broadcast::Sender::receiver_count)
            .unwrap_or(0)
    }

    pub fn active_channels(&self) -> usize {
        self.channels.lock().len()
    }

    fn release(&self, share_id: &ShareId) {
        let mut channels = self.channels.lock();
        // the dropping receiver still counts until its drop completes
        if channels
            .get(share_id)
            .is_some_and(|tx| tx.receiver_count() <= 1)
        {
            channels.remove(share_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn share() -> ShareId {
        ShareId::parse("peer").unwrap()
    }

    #[test]
    fn test_parse_accepts_known_types() {
        for kind in ["offer", "answer", "candidate"] {
            let msg = SignalMessage::parse(json!({"type": kind, "sdp": "x"})).unwrap();
            assert_eq!(msg.payload["sdp"], "x");
        }
        assert!(matches!(
            SignalMessage::parse(json!({"type": "bye"})),
            Err(SignalError::UnknownType)
        ));
        assert!(matches!(
            SignalMessage::parse(json!(["offer"])),
            Err(SignalError::NotAnObject)
        ));
    }

    #[tokio::test]
    async fn test_relay_reaches_subscribers() {
        let hub = SignalingHub::new();
        let mut sub = hub.subscribe(&share());

        let msg = SignalMessage::parse(json!({"type": "offer", "sdp": "v=0"})).unwrap();
        assert_eq!(hub.relay(&share(), msg.clone()), 1);
        assert_eq!(sub.recv().await.unwrap(), msg);
    }

    #[test]
    fn test_channel_dropped_with_last_subscriber() {
        let hub = SignalingHub::new();
        let a = hub.subscribe(&share());
        let b = hub.subscribe(&share());
        assert_eq!(hub.subscriber_count(&share()), 2);

        drop(a);
        assert_eq!(hub.active_channels(), 1);
        drop(b);
        assert_eq!(hub.active_channels(), 0);

        let msg = SignalMessage::parse(json!({"type": "answer"})).unwrap();
        assert_eq!(hub.relay(&share(), msg), 0);
    }
}
