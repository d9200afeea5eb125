//! Background thread running [`OutboxWorker::tick`] on a fixed interval.

use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};

use tracing::{error, info};

use super::store::OutboxStore;
use super::worker::OutboxWorker;
use crate::bus::Publisher;

/// Totals over the life of an [`OutboxWorkerThread`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    pub published: usize,
    pub retried: usize,
    pub parked: usize,
    pub ticks: usize,
    /// Ticks or row updates that failed in the store.
    pub errors: usize,
}

/// A background thread that drains the outbox to a publisher.
///
/// ```ignore
/// let worker = OutboxWorker::new(repo.clone(), queue.clone())
///     .with_poll_interval(Duration::from_millis(50));
/// let handle = OutboxWorkerThread::spawn(worker);
/// // ...
/// let stats = handle.stop();
/// ```
pub struct OutboxWorkerThread {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<WorkerStats>>,
}

impl OutboxWorkerThread {
    pub fn spawn<S, P>(worker: OutboxWorker<S, P>) -> Self
    where
        S: OutboxStore + 'static,
        P: Publisher + 'static,
    {
        let (stop_tx, stop_rx) = channel();

        let handle = thread::spawn(move || {
            let mut stats = WorkerStats::default();
            let worker_id = worker.config().worker_id.clone();
            let interval = worker.config().poll_interval();
            info!(worker_id = %worker_id, interval_ms = interval.as_millis() as u64, "outbox worker started");

            loop {
                stats.ticks += 1;
                match worker.tick() {
                    Ok(result) => {
                        stats.published += result.published;
                        stats.retried += result.retried;
                        stats.parked += result.parked;
                        stats.errors += result.errors;
                    }
                    Err(e) => {
                        error!(worker_id = %worker_id, error = %e, "outbox tick failed");
                        stats.errors += 1;
                    }
                }

                match stop_rx.recv_timeout(interval) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }
            }

            info!(worker_id = %worker_id, published = stats.published, parked = stats.parked, "outbox worker stopped");
            stats
        });

        Self {
            stop_tx,
            handle: Some(handle),
        }
    }

    /// Signal the worker to stop and wait for it to finish.
    pub fn stop(mut self) -> WorkerStats {
        let _ = self.stop_tx.send(());
        self.handle
            .take()
            .map(|handle| handle.join().unwrap_or_default())
            .unwrap_or_default()
    }
}

impl Drop for OutboxWorkerThread {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}
