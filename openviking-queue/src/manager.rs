//! Queue manager: owns all named queues and one worker task per queue.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use openviking_core::{BlobStore, Result, VikingError};

use crate::named_queue::{DequeueHandler, NamedQueue, QueueStatus};

/// Queue mount root under the reserved internal scope.
pub const QUEUE_MOUNT_ROOT: &str = "/local/_system/queues";

/// Owns the named queues and drives their worker loops.
pub struct QueueManager {
    blob: Arc<dyn BlobStore>,
    queues: DashMap<String, Arc<NamedQueue>>,
    workers: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
    poll_interval: Duration,
}

impl QueueManager {
    pub fn new(blob: Arc<dyn BlobStore>, poll_interval: Duration) -> Self {
        Self {
            blob,
            queues: DashMap::new(),
            workers: parking_lot::Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
            poll_interval,
        }
    }

    /// Create and register a queue. Must happen before [`Self::start`].
    pub async fn register_queue(
        &self,
        name: &str,
        handler: Option<Arc<dyn DequeueHandler>>,
        max_concurrent: usize,
    ) -> Result<Arc<NamedQueue>> {
        let queue = Arc::new(
            NamedQueue::open(name, self.blob.clone(), QUEUE_MOUNT_ROOT, max_concurrent).await?,
        );
        if let Some(handler) = handler {
            queue.set_handler(handler);
        }
        self.queues.insert(name.to_string(), queue.clone());
        info!("Registered queue {} (max_concurrent={})", name, max_concurrent);
        Ok(queue)
    }

    pub fn get_queue(&self, name: &str) -> Option<Arc<NamedQueue>> {
        self.queues.get(name).map(|entry| entry.value().clone())
    }

    /// Spawn one worker per registered queue.
    pub fn start(&self) {
        let mut workers = self.workers.lock();
        for entry in self.queues.iter() {
            let queue = entry.value().clone();
            let cancel = self.cancel.clone();
            let poll = self.poll_interval;
            workers.push(tokio::spawn(async move {
                worker_loop(queue, cancel, poll).await;
            }));
        }
        info!("Queue manager started {} workers", workers.len());
    }

    /// Wait until every queue is drained (`size == 0 && in_progress == 0`).
    pub async fn wait_complete(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let mut complete = true;
            for entry in self.queues.iter() {
                if !entry.value().get_status().await?.is_complete {
                    complete = false;
                    break;
                }
            }
            if complete {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(VikingError::timeout(format!(
                    "queues did not drain within {timeout:?}"
                )));
            }
            sleep(Duration::from_millis(50)).await;
        }
    }

    pub async fn get_all_status(&self) -> Result<HashMap<String, QueueStatus>> {
        let mut statuses = HashMap::new();
        for entry in self.queues.iter() {
            statuses.insert(entry.key().clone(), entry.value().get_status().await?);
        }
        Ok(statuses)
    }

    /// Stop the workers, draining in-flight handler calls first.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if let Err(e) = worker.await {
                warn!("Queue worker exited abnormally: {}", e);
            }
        }
        info!("Queue manager stopped");
    }
}

/// The per-queue worker loop.
///
/// Serial queues dequeue and invoke the handler inline; concurrent queues
/// dispatch under a semaphore up to the queue's cap. Messages are counted
/// exactly once via the queue's counter surface.
async fn worker_loop(queue: Arc<NamedQueue>, cancel: CancellationToken, poll: Duration) {
    let max = queue.max_concurrent();
    let semaphore = Arc::new(Semaphore::new(max));
    let mut tasks: JoinSet<()> = JoinSet::new();

    loop {
        if cancel.is_cancelled() {
            break;
        }
        let handler = match queue.handler() {
            Some(handler) => handler,
            None => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = sleep(poll) => {}
                }
                continue;
            }
        };

        let has_work = match queue.size().await {
            Ok(size) => size > 0,
            Err(e) => {
                warn!("Queue {} size check failed: {}", queue.name(), e);
                false
            }
        };
        if !has_work {
            while tasks.try_join_next().is_some() {}
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(poll) => continue,
            }
        }

        if max > 1 {
            // Concurrent dispatch: take a permit, pop, hand off to a task.
            let permit = match semaphore.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tasks.join_next() => {}
                    }
                    continue;
                }
            };
            queue.on_dequeue_start();
            match queue.dequeue().await {
                Ok(Some(envelope)) => {
                    let queue = queue.clone();
                    let handler = handler.clone();
                    tasks.spawn(async move {
                        match handler.on_dequeue(envelope.clone()).await {
                            Ok(()) => queue.report_success(),
                            Err(e) => queue.report_error(&e.to_string(), &envelope),
                        }
                        drop(permit);
                    });
                }
                Ok(None) => {
                    queue.on_dequeue_abort();
                    drop(permit);
                }
                Err(e) => {
                    warn!("Queue {} dequeue failed: {}", queue.name(), e);
                    queue.on_dequeue_abort();
                    drop(permit);
                    sleep(poll).await;
                }
            }
        } else {
            queue.on_dequeue_start();
            match queue.dequeue().await {
                Ok(Some(envelope)) => match handler.on_dequeue(envelope.clone()).await {
                    Ok(()) => queue.report_success(),
                    Err(e) => queue.report_error(&e.to_string(), &envelope),
                },
                Ok(None) => queue.on_dequeue_abort(),
                Err(e) => {
                    warn!("Queue {} dequeue failed: {}", queue.name(), e);
                    queue.on_dequeue_abort();
                    sleep(poll).await;
                }
            }
        }
    }

    // Drain all active tasks before exiting.
    while tasks.join_next().await.is_some() {}
    debug!("Queue worker for {} exited", queue.name());
}
