//! Bounded task queue drained by a fixed worker pool
//!
//! Producers never wait: [`TaskQueue::try_enqueue`] hands the task back when
//! the queue is full or not running, and the caller runs it inline.
//!
//! Shutdown drops the only sender, so a push racing with it either lands
//! before the channel closes (and is drained by the workers) or is handed
//! back. Tasks still queued when workers are aborted are returned to the
//! caller.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use futures_util::future::join_all;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Work deferred from the write path
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum MonitorTask {
    /// Add `key` to `group` and advance the group's update record
    Register { group: String, key: String },
    /// Delete every member of `group`
    Invalidate { group: String },
}

/// Outcome of a non-blocking push
#[derive(Debug)]
pub(crate) enum Enqueue {
    Queued,
    /// Not accepted; run it on the caller
    Rejected(MonitorTask),
}

pub(crate) struct TaskQueue {
    /// `None` once shut down
    sender: parking_lot::Mutex<Option<mpsc::Sender<MonitorTask>>>,
    receiver: Arc<Mutex<mpsc::Receiver<MonitorTask>>>,
    workers: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    closed: AtomicBool,
}

impl TaskQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            sender: parking_lot::Mutex::new(Some(sender)),
            receiver: Arc::new(Mutex::new(receiver)),
            workers: parking_lot::Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.started.load(Ordering::Acquire) && !self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn try_enqueue(&self, task: MonitorTask) -> Enqueue {
        if !self.started.load(Ordering::Acquire) {
            return Enqueue::Rejected(task);
        }
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return Enqueue::Rejected(task);
        };
        match sender.try_send(task) {
            Ok(()) => Enqueue::Queued,
            Err(mpsc::error::TrySendError::Full(task)) => {
                debug!("monitor queue full, running task inline");
                Enqueue::Rejected(task)
            }
            Err(mpsc::error::TrySendError::Closed(task)) => Enqueue::Rejected(task),
        }
    }

    /// Spawn `workers` tasks feeding queued work to `handler`. Only the first
    /// call has an effect.
    pub(crate) fn start<F, Fut>(&self, workers: usize, handler: F)
    where
        F: Fn(MonitorTask) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.closed.load(Ordering::Acquire) || self.started.swap(true, Ordering::AcqRel) {
            return;
        }

        let handler = Arc::new(handler);
        let mut handles = self.workers.lock();
        for worker_id in 0..workers.max(1) {
            let receiver = Arc::clone(&self.receiver);
            let handler = Arc::clone(&handler);

            handles.push(tokio::spawn(async move {
                // `recv` yields `None` only once the sender is gone and the
                // channel is empty, so accepted work is always finished.
                loop {
                    let next = receiver.lock().await.recv().await;
                    match next {
                        Some(task) => handler(task).await,
                        None => break,
                    }
                }
                debug!(worker_id, "monitor worker stopped");
            }));
        }
        info!(workers = handles.len(), "Monitor worker pool started");
    }

    /// Close the queue, let workers drain it and stop
    ///
    /// Workers still running after `grace` are aborted; the task each was
    /// handling is lost, and whatever is left in the queue is returned so the
    /// caller can run it. Later calls return nothing.
    pub(crate) async fn shutdown(&self, grace: Duration) -> Vec<MonitorTask> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Vec::new();
        }
        drop(self.sender.lock().take());

        let mut handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        let count = handles.len();
        if tokio::time::timeout(grace, join_all(handles.iter_mut()))
            .await
            .is_err()
        {
            warn!(grace_ms = grace.as_millis(), "monitor workers did not stop in time, aborting");
            for handle in &handles {
                handle.abort();
            }
            // Wait for the aborts so no worker still holds the receiver.
            join_all(handles).await;
        }

        let mut leftovers = Vec::new();
        let mut receiver = self.receiver.lock().await;
        while let Ok(task) = receiver.try_recv() {
            leftovers.push(task);
        }
        if count > 0 {
            info!(workers = count, leftovers = leftovers.len(), "Monitor worker pool stopped");
        }
        leftovers
    }
}
