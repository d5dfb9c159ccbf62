use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use common::prelude::{ProgressEvent, ShareId};

/// Events buffered per listener before further events are dropped for it
const LISTENER_BUFFER: usize = 32;

pub type ListenerId = u64;

type Listeners = HashMap<ShareId, HashMap<ListenerId, mpsc::Sender<ProgressEvent>>>;

/// Fan-out of upload progress to live listeners.
///  Publishing never blocks: a listener with a full buffer misses the event,
///  and a listener whose receiver is gone is pruned on the spot.
#[derive(Debug, Clone, Default)]
pub struct ProgressBroadcaster {
    listeners: Arc<Mutex<Listeners>>,
    next_id: Arc<AtomicU64>,
}

/// Receiving half handed to a subscriber
#[derive(Debug)]
pub struct Subscription {
    pub id: ListenerId,
    pub share_id: ShareId,
    pub events: mpsc::Receiver<ProgressEvent>,
}

impl ProgressBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, share_id: &ShareId) -> Subscription {
        let (tx, rx) = mpsc::channel(LISTENER_BUFFER);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .entry(share_id.clone())
            .or_default()
            .insert(id, tx);

        tracing::debug!(share_id = %share_id, listener = id, "progress listener subscribed");
        Subscription {
            id,
            share_id: share_id.clone(),
            events: rx,
        }
    }

    /// Remove a listener. Unknown ids are ignored.
    pub fn unsubscribe(&self, share_id: &ShareId, id: ListenerId) {
        let mut listeners = self.listeners.lock();
        if let Some(set) = listeners.get_mut(share_id) {
            set.remove(&id);
            if set.is_empty() {
                listeners.remove(share_id);
            }
        }
    }

    /// Deliver `event` to every listener of its share, returning how many
    ///  accepted it
    pub fn publish(&self, event: &ProgressEvent) -> usize {
        let mut listeners = self.listeners.lock();
        let Some(set) = listeners.get_mut(&event.share_id) else {
            return 0;
        };

        let mut delivered = 0;
        set.retain(|id, tx| match tx.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                tracing::trace!(share_id = %event.share_id, listener = id, "listener lagging, event skipped");
                true
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(share_id = %event.share_id, listener = id, "pruning closed listener");
                false
            }
        });

        if set.is_empty() {
            listeners.remove(&event.share_id);
        }
        delivered
    }

    /// Drop every listener of a share, ending their streams
    pub fn close(&self, share_id: &ShareId) {
        if let Some(set) = self.listeners.lock().remove(share_id) {
            tracing::debug!(share_id = %share_id, listeners = set.len(), "progress listeners closed");
        }
    }

    pub fn listener_count(&self, share_id: &ShareId) -> usize {
        self.listeners
            .lock()
            .get(share_id)
            .map(HashMap::len)
            .unwrap_or(0)
    }
}
