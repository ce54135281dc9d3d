//! Event Broadcaster (C8, §4.8).
//!
//! A process-local multi-producer multi-consumer fan-out over bounded
//! per-subscriber channels. The backpressure policy is *drop slow
//! consumer*: a subscriber whose buffer is full is dropped from the
//! registry rather than blocking the publisher, the same shape as the
//! `try_send` / `TrySendError::Full` handling around the teacher's
//! `persist_tx`/`afad_tx` queues in
//! `examples/burakkonte-sinyalist/backend/src/main.rs`.

use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

const SUBSCRIBER_BUFFER: usize = 256;

pub struct Subscriber {
    pub id: u64,
    pub receiver: mpsc::Receiver<Value>,
}

struct Slot {
    id: u64,
    sender: mpsc::Sender<Value>,
}

pub struct Broadcaster {
    subscribers: Mutex<Vec<Slot>>,
    next_id: AtomicU64,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Broadcaster {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscriber {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.subscribers.lock().push(Slot { id, sender: tx });
        tracing::debug!(subscriber_id = id, "subscriber added");
        Subscriber { id, receiver: rx }
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().retain(|s| s.id != id);
    }

    /// Sends `event` to every current subscriber. A full buffer or a closed
    /// receiver drops that subscriber from the registry; it never blocks or
    /// slows down delivery to the others.
    pub fn publish(&self, event: Value) {
        let snapshot: Vec<(u64, mpsc::Sender<Value>)> = self
            .subscribers
            .lock()
            .iter()
            .map(|s| (s.id, s.sender.clone()))
            .collect();

        let mut dead = Vec::new();
        for (id, sender) in snapshot {
            match sender.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(subscriber_id = id, "subscriber buffer full, dropping slow consumer");
                    dead.push(id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    dead.push(id);
                }
            }
        }

        if !dead.is_empty() {
            let mut subs = self.subscribers.lock();
            subs.retain(|s| !dead.contains(&s.id));
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn publish_delivers_to_subscriber() {
        let b = Broadcaster::new();
        let mut sub = b.subscribe();
        b.publish(json!({"type": "new_request", "data": {}}));
        let msg = sub.receiver.recv().await.unwrap();
        assert_eq!(msg["type"], "new_request");
    }

    #[tokio::test]
    async fn full_buffer_drops_subscriber_without_blocking() {
        let b = Broadcaster::new();
        let sub = b.subscribe();
        for _ in 0..(SUBSCRIBER_BUFFER + 10) {
            b.publish(json!({"type": "tick"}));
        }
        assert_eq!(b.subscriber_count(), 0);
        drop(sub);
    }

    #[tokio::test]
    async fn unsubscribe_removes_slot() {
        let b = Broadcaster::new();
        let sub = b.subscribe();
        assert_eq!(b.subscriber_count(), 1);
        b.unsubscribe(sub.id);
        assert_eq!(b.subscriber_count(), 0);
    }
}
