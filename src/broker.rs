//! Fan-out of "new data" notifications to live subscribers.
//!
//! Each subscriber owns a small bounded queue. Publishing never waits: a
//! subscriber whose queue is full is dropped from the registry and has to
//! subscribe again.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;
use uuid::Uuid;

pub const SUBSCRIBER_QUEUE: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub name: Option<String>,
    pub data: String,
}

impl Event {
    pub fn new(name: Option<&str>, data: impl Into<String>) -> Self {
        Self {
            name: name.map(str::to_string),
            data: data.into(),
        }
    }

    /// The "data updated" notification sent after each applied reading.
    pub fn update(data: impl Into<String>) -> Self {
        Self::new(Some("update"), data)
    }

    /// Event-stream wire form: optional `event:` line, `data:` line, blank line.
    pub fn to_sse(&self) -> String {
        let msg = format!("data: {}\n\n", self.data);
        match &self.name {
            Some(name) => format!("event: {}\n{}", name, msg),
            None => msg,
        }
    }
}

type Registry = Mutex<HashMap<Uuid, mpsc::Sender<Event>>>;

fn lock(registry: &Registry) -> MutexGuard<'_, HashMap<Uuid, mpsc::Sender<Event>>> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct Broker {
    subscribers: Arc<Registry>,
    queue_capacity: usize,
}

impl Broker {
    pub fn new() -> Self {
        Self::with_queue_capacity(SUBSCRIBER_QUEUE)
    }

    pub fn with_queue_capacity(queue_capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            queue_capacity: queue_capacity.max(1),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let id = Uuid::new_v4();
        lock(&self.subscribers).insert(id, tx);
        debug!(%id, "subscriber registered");
        Subscription {
            id,
            rx,
            registry: Arc::downgrade(&self.subscribers),
        }
    }

    /// Deliver to every subscriber without blocking; returns how many received it.
    pub fn publish(&self, event: Event) -> usize {
        let mut subs = lock(&self.subscribers);
        let mut delivered = 0;
        subs.retain(|id, tx| match tx.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                debug!(%id, "subscriber queue full; disconnecting");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        });
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving end of a subscription; unregisters itself when dropped.
pub struct Subscription {
    id: Uuid,
    rx: mpsc::Receiver<Event>,
    registry: Weak<Registry>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Wait for the next event. `None` once the broker has dropped this
    /// subscriber and the backlog is drained.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            if lock(&registry).remove(&self.id).is_some() {
                debug!(id = %self.id, "subscriber released");
            }
        }
    }
}
