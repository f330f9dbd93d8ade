//! Fan-out of status-change events to live viewers.
//!
//! Each subscriber is a bounded channel; the WebSocket task on the other end
//! forwards events to its socket. When that task dies its receiver is
//! dropped, so the next broadcast fails for it and it gets pruned.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::supervisor::state_machine::InstanceStatus;

const SUBSCRIBER_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    StatusUpdate,
}

/// `{"type": "status_update", "machine": "<id>", "status": "<status>"}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub machine: String,
    pub status: InstanceStatus,
}

impl StatusEvent {
    pub fn status_update(machine: &str, status: InstanceStatus) -> Self {
        Self {
            kind: EventKind::StatusUpdate,
            machine: machine.to_string(),
            status,
        }
    }
}

pub type SubscriberId = Uuid;

pub struct Subscription {
    pub id: SubscriberId,
    pub events: mpsc::Receiver<StatusEvent>,
}

#[derive(Default)]
pub struct BroadcastHub {
    subscribers: Mutex<HashMap<SubscriberId, mpsc::Sender<StatusEvent>>>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber whose queue already holds `snapshot`, so the
    /// snapshot is always delivered ahead of any later update.
    pub fn subscribe(&self, snapshot: Vec<StatusEvent>) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER.max(snapshot.len()));
        for event in snapshot {
            // 방금 만든 채널이고 용량이 충분하므로 실패하지 않음
            let _ = tx.try_send(event);
        }

        let id = Uuid::new_v4();
        match self.subscribers.lock() {
            Ok(mut subs) => {
                subs.insert(id, tx);
                tracing::debug!("Subscriber {} joined ({} active)", id, subs.len());
            }
            Err(e) => tracing::error!("BroadcastHub lock poisoned on subscribe: {}", e),
        }
        Subscription { id, events: rx }
    }

    /// Remove a subscriber. Unknown or already-removed ids are ignored.
    pub fn unsubscribe(&self, id: SubscriberId) {
        if let Ok(mut subs) = self.subscribers.lock() {
            if subs.remove(&id).is_some() {
                tracing::debug!("Subscriber {} left ({} active)", id, subs.len());
            }
        }
    }

    /// Deliver `event` to every subscriber, pruning the ones that can no
    /// longer receive. Returns the number of successful deliveries.
    pub fn broadcast(&self, event: &StatusEvent) -> usize {
        let mut subs = match self.subscribers.lock() {
            Ok(subs) => subs,
            Err(e) => {
                tracing::error!("BroadcastHub lock poisoned on broadcast: {}", e);
                return 0;
            }
        };

        let mut delivered = 0;
        subs.retain(|id, tx| match tx.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("Pruning closed subscriber {}", id);
                false
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Subscriber {} is not keeping up, dropping it", id);
                false
            }
        });

        tracing::debug!(
            "Broadcast {} -> {} to {} subscribers",
            event.machine,
            event.status,
            delivered
        );
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }
}
