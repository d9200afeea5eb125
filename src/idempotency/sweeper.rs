use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::guard::IdempotencyGuard;

/// Background thread evicting expired idempotency keys. Returns the number
/// of evicted entries when stopped.
pub struct IdempotencySweeper {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<usize>>,
}

impl IdempotencySweeper {
    pub fn spawn(guard: IdempotencyGuard) -> Self {
        let interval = guard.config().sweep_interval();
        Self::spawn_with_interval(guard, interval)
    }

    pub fn spawn_with_interval(guard: IdempotencyGuard, interval: Duration) -> Self {
        let (stop_tx, stop_rx) = channel();

        let handle = thread::spawn(move || {
            let mut evicted = 0;
            info!(interval_ms = interval.as_millis() as u64, "idempotency sweeper started");
            loop {
                match stop_rx.recv_timeout(interval) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }
                match guard.sweep_expired() {
                    Ok(0) => {}
                    Ok(n) => {
                        debug!(evicted = n, "idempotency keys expired");
                        evicted += n;
                    }
                    Err(e) => warn!(error = %e, "idempotency sweep failed"),
                }
            }
            info!(evicted, "idempotency sweeper stopped");
            evicted
        });

        Self {
            stop_tx,
            handle: Some(handle),
        }
    }

    pub fn stop(mut self) -> usize {
        let _ = self.stop_tx.send(());
        self.handle
            .take()
            .map(|handle| handle.join().unwrap_or_default())
            .unwrap_or_default()
    }
}

impl Drop for IdempotencySweeper {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}
