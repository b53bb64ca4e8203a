//! Bounded, strictly-ordered send queues.
//!
//! Every TCP peer and UDP endpoint owns one [`SendQueue`]: a
//! multi-producer FIFO with a hard capacity, drained by a single worker
//! task. Items are processed one at a time in enqueue order, and each
//! worker invocation is awaited to completion before the next item
//! starts, which is what makes per-peer write ordering a guarantee of
//! the public API.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::cancel::CancelToken;
use crate::error::{NetError, Result};

enum Producer<T> {
    Bounded(mpsc::Sender<T>),
    Unbounded(mpsc::UnboundedSender<T>),
}

impl<T> Clone for Producer<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Bounded(tx) => Self::Bounded(tx.clone()),
            Self::Unbounded(tx) => Self::Unbounded(tx.clone()),
        }
    }
}

/// A bounded (or unbounded) FIFO with a single owned worker task.
///
/// Completing the queue closes the producer side; items already accepted
/// are still drained by the worker, in order, before it exits. A failure
/// inside the worker must not halt the queue; workers report errors
/// through their own side channels.
pub struct SendQueue<T> {
    producer: Arc<Mutex<Option<Producer<T>>>>,
    capacity: Option<usize>,
}

impl<T> Clone for SendQueue<T> {
    fn clone(&self) -> Self {
        Self {
            producer: self.producer.clone(),
            capacity: self.capacity,
        }
    }
}

impl<T: Send + 'static> SendQueue<T> {
    /// Create a queue and spawn its worker task on the current tokio
    /// runtime.
    ///
    /// `capacity` of `None` means unbounded; `Some(n)` is clamped to at
    /// least one slot. The worker is invoked once per item and awaited to
    /// completion before the next item is popped.
    pub fn spawn<F, Fut>(capacity: Option<usize>, mut worker: F) -> Self
    where
        F: FnMut(T) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let producer = match capacity {
            Some(n) => {
                let (tx, mut rx) = mpsc::channel::<T>(n.max(1));
                tokio::spawn(async move {
                    while let Some(item) = rx.recv().await {
                        worker(item).await;
                    }
                });
                Producer::Bounded(tx)
            }
            None => {
                let (tx, mut rx) = mpsc::unbounded_channel::<T>();
                tokio::spawn(async move {
                    while let Some(item) = rx.recv().await {
                        worker(item).await;
                    }
                });
                Producer::Unbounded(tx)
            }
        };

        Self {
            producer: Arc::new(Mutex::new(Some(producer))),
            capacity,
        }
    }

    /// Enqueue without waiting.
    ///
    /// Returns `false` when the queue is full or has been completed.
    pub fn try_post(&self, item: T) -> bool {
        match &*self.producer.lock() {
            Some(Producer::Bounded(tx)) => tx.try_send(item).is_ok(),
            Some(Producer::Unbounded(tx)) => tx.send(item).is_ok(),
            None => false,
        }
    }

    /// Enqueue, waiting for a slot if the queue is full.
    ///
    /// Returns `Ok(true)` once the item is accepted, `Ok(false)` if the
    /// queue was completed (or `engine` fired) before that could happen,
    /// and `Err(Cancelled)` if `cancel` fired while the engine token had
    /// not.
    pub async fn send(
        &self,
        item: T,
        cancel: Option<&CancelToken>,
        engine: &CancelToken,
    ) -> Result<bool> {
        // Clone the producer out so the lock is not held across awaits.
        let producer = match &*self.producer.lock() {
            Some(p) => p.clone(),
            None => return Ok(false),
        };

        if engine.is_cancelled() {
            return Ok(false);
        }

        match producer {
            Producer::Unbounded(tx) => Ok(tx.send(item).is_ok()),
            Producer::Bounded(tx) => {
                tokio::select! {
                    permit = tx.reserve() => match permit {
                        Ok(permit) => {
                            permit.send(item);
                            Ok(true)
                        }
                        Err(_) => Ok(false),
                    },
                    _ = engine.cancelled() => Ok(false),
                    _ = wait_external(cancel) => {
                        if engine.is_cancelled() {
                            Ok(false)
                        } else {
                            Err(NetError::Cancelled)
                        }
                    }
                }
            }
        }
    }

    /// Close the queue.
    ///
    /// No further items are accepted; the worker drains what was already
    /// enqueued, then exits. Idempotent.
    pub fn complete(&self) {
        self.producer.lock().take();
    }

    /// Whether [`complete`](Self::complete) has been called.
    pub fn is_completed(&self) -> bool {
        self.producer.lock().is_none()
    }

    /// The configured capacity; `None` means unbounded.
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}

async fn wait_external(cancel: Option<&CancelToken>) {
    match cancel {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

impl<T: Send + 'static> std::fmt::Debug for SendQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendQueue")
            .field("capacity", &self.capacity)
            .field("completed", &self.is_completed())
            .finish()
    }
}
