//! In-process message queues with at-least-once redelivery.
//!
//! Stand-in for hosted queue infrastructure: a named unbounded channel
//! carrying deliveries with an attempt counter and a live depth gauge.
//! Single-message consumers ack by doing nothing and fail by calling
//! [`Queue::redeliver`]; the results consumer takes whole groups via
//! [`QueueReceiver::drain`] and always acks them atomically.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::mpsc;
use uuid::Uuid;

/// One delivery of a message.
///
/// `attempt` counts deliveries of this message (starting at 1), not
/// application-level retries - those live in the message body.
#[derive(Debug)]
pub struct Delivery<T> {
    pub body: T,
    pub id: Uuid,
    pub attempt: u32,
}

struct Shared<T> {
    name: &'static str,
    tx: mpsc::UnboundedSender<Delivery<T>>,
    depth: AtomicUsize,
    max_deliveries: u32,
}

/// Producer half. Cheap to clone; every producer shares the depth gauge.
pub struct Queue<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Consumer half. There is exactly one per queue.
pub struct QueueReceiver<T> {
    rx: mpsc::UnboundedReceiver<Delivery<T>>,
    shared: Arc<Shared<T>>,
}

/// Create a named queue. `max_deliveries` bounds redelivery: past it a
/// failed delivery is dropped instead of requeued.
pub fn queue<T>(name: &'static str, max_deliveries: u32) -> (Queue<T>, QueueReceiver<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared {
        name,
        tx,
        depth: AtomicUsize::new(0),
        max_deliveries,
    });
    (
        Queue {
            shared: Arc::clone(&shared),
        },
        QueueReceiver { rx, shared },
    )
}

impl<T> Queue<T> {
    pub fn name(&self) -> &'static str {
        self.shared.name
    }

    /// Messages currently queued and not yet delivered.
    pub fn len(&self) -> usize {
        self.shared.depth.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enqueue a fresh message. Returns false if the consumer is gone.
    pub fn send(&self, body: T) -> bool {
        self.push(Delivery {
            body,
            id: Uuid::new_v4(),
            attempt: 1,
        })
    }

    /// Return a failed delivery to the queue for another attempt.
    ///
    /// Once the attempt count exceeds `max_deliveries` the delivery is
    /// dead-lettered to the log and dropped. Returns false when dropped.
    pub fn redeliver(&self, mut delivery: Delivery<T>) -> bool {
        delivery.attempt += 1;
        if delivery.attempt > self.shared.max_deliveries {
            tracing::warn!(
                queue = self.shared.name,
                delivery = %delivery.id,
                attempts = delivery.attempt - 1,
                "dropping delivery after max attempts"
            );
            return false;
        }
        self.push(delivery)
    }

    fn push(&self, delivery: Delivery<T>) -> bool {
        self.shared.depth.fetch_add(1, Ordering::SeqCst);
        if self.shared.tx.send(delivery).is_err() {
            self.shared.depth.fetch_sub(1, Ordering::SeqCst);
            tracing::warn!(queue = self.shared.name, "queue consumer gone, message lost");
            return false;
        }
        true
    }
}

impl<T> QueueReceiver<T> {
    /// Wait for the next delivery. `None` once all producers are dropped
    /// and the queue is drained.
    pub async fn recv(&mut self) -> Option<Delivery<T>> {
        let delivery = self.rx.recv().await?;
        self.shared.depth.fetch_sub(1, Ordering::SeqCst);
        Some(delivery)
    }

    /// Take up to `max` already-queued deliveries without waiting.
    pub fn drain(&mut self, max: usize) -> Vec<Delivery<T>> {
        let mut group = Vec::new();
        while group.len() < max {
            match self.rx.try_recv() {
                Ok(delivery) => {
                    self.shared.depth.fetch_sub(1, Ordering::SeqCst);
                    group.push(delivery);
                }
                Err(_) => break,
            }
        }
        group
    }

    /// Producer handle for redelivering from the consumer side.
    pub fn queue(&self) -> Queue<T> {
        Queue {
            shared: Arc::clone(&self.shared),
        }
    }
}
