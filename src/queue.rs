//! Bounded FIFO with blocking push and competing consumers.
//!
//! Backs both the pending connection queue (one acceptor, N workers) and the
//! relay buffer (one feed listener, one upstream bridge). Each pushed item is
//! handed to exactly one `pop` caller, in push order.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

/// Returned by [`QueueSender::push`] when every receiver is gone.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("queue closed")]
pub struct QueueClosed<T>(pub T);

/// Create a queue holding at most `capacity` items.
///
/// # Panics
/// Panics if `capacity` is zero; configuration validation rejects that earlier.
pub fn bounded<T>(capacity: usize) -> (QueueSender<T>, QueueReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        QueueSender { inner: tx },
        QueueReceiver {
            inner: Arc::new(Mutex::new(rx)),
            capacity,
        },
    )
}

/// Producing end. Dropping every sender closes the queue once it drains.
#[derive(Debug)]
pub struct QueueSender<T> {
    inner: mpsc::Sender<T>,
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> QueueSender<T> {
    /// Push an item, waiting while the queue is full.
    pub async fn push(&self, item: T) -> Result<(), QueueClosed<T>> {
        self.inner.send(item).await.map_err(|e| QueueClosed(e.0))
    }

    /// Push without waiting. Hands the item back when full or closed.
    pub fn try_push(&self, item: T) -> Result<(), T> {
        self.inner.try_send(item).map_err(|e| match e {
            mpsc::error::TrySendError::Full(item) | mpsc::error::TrySendError::Closed(item) => item,
        })
    }

    /// Items currently buffered.
    pub fn len(&self) -> usize {
        self.inner.max_capacity() - self.inner.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.max_capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

/// Consuming end. Clones compete for items.
#[derive(Debug)]
pub struct QueueReceiver<T> {
    inner: Arc<Mutex<mpsc::Receiver<T>>>,
    capacity: usize,
}

impl<T> Clone for QueueReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            capacity: self.capacity,
        }
    }
}

impl<T> QueueReceiver<T> {
    /// Take the oldest item, waiting while the queue is empty.
    ///
    /// Returns `None` once every sender is dropped and the queue is drained.
    /// Cancel safe: an item is never lost when the returned future is dropped.
    pub async fn pop(&self) -> Option<T> {
        let mut rx = self.inner.lock().await;
        rx.recv().await
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
