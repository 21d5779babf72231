//! Fixed-size worker pool fed by a bounded queue.
//!
//! N long-lived workers compete for items on one [`QueueReceiver`]. A worker
//! runs the handler to completion before taking the next item, so at most N
//! items are in progress at any time.

use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::lifecycle::ShutdownSignal;
use crate::queue::QueueReceiver;

/// Handles to the spawned workers.
#[derive(Debug)]
pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` workers that call `handler` for every dequeued item.
    ///
    /// Workers exit when the queue is closed and drained, or on shutdown.
    pub fn spawn<T, F, Fut>(
        size: usize,
        queue: QueueReceiver<T>,
        handler: F,
        shutdown: ShutdownSignal,
    ) -> Self
    where
        T: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let workers = (0..size)
            .map(|worker_id| {
                let queue = queue.clone();
                let handler = Arc::clone(&handler);
                let mut shutdown = shutdown.clone();
                tokio::spawn(async move {
                    tracing::debug!(worker_id, "Worker started");
                    loop {
                        let item = tokio::select! {
                            biased;
                            _ = shutdown.recv() => break,
                            item = queue.pop() => item,
                        };
                        match item {
                            Some(item) => handler(item).await,
                            None => break,
                        }
                    }
                    tracing::debug!(worker_id, "Worker stopped");
                })
            })
            .collect();

        tracing::info!(workers = size, "Worker pool started");
        Self { workers }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Wait for every worker to exit.
    pub async fn join(self) {
        for worker in self.workers {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Worker task failed");
            }
        }
    }
}
