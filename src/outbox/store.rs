use std::time::Duration;

use super::record::{OutboxRecord, OutboxStats, OutboxStatus};
use crate::domain::RepositoryError;

/// Worker-facing side of the outbox table.
///
/// Appends happen only inside a commit. Everything here runs outside any
/// business transaction and is safe to retry.
pub trait OutboxStore: Send + Sync {
    /// Pending rows, oldest first, regardless of leases.
    fn fetch_pending(&self, limit: usize) -> Result<Vec<OutboxRecord>, RepositoryError>;

    /// Atomically lease up to `limit` claimable rows to `worker_id`, oldest first.
    fn claim_pending(
        &self,
        worker_id: &str,
        limit: usize,
        lease: Duration,
    ) -> Result<Vec<OutboxRecord>, RepositoryError>;

    /// Pending -> Published. A row that is already published is left untouched.
    fn mark_published(&self, event_id: &str) -> Result<(), RepositoryError>;

    /// Count a failed publish attempt. The row is parked as Failed once
    /// `retry_count` reaches `max_retries`; the resulting status is returned.
    fn record_failure(
        &self,
        event_id: &str,
        error: &str,
        max_retries: u32,
    ) -> Result<OutboxStatus, RepositoryError>;

    /// Park a row as Failed immediately.
    fn mark_failed(&self, event_id: &str, error: &str) -> Result<(), RepositoryError>;

    /// Failed -> Pending with the retry counter and last error cleared.
    fn retry_failed(&self, event_id: &str) -> Result<(), RepositoryError>;

    fn outbox_record(&self, event_id: &str) -> Result<Option<OutboxRecord>, RepositoryError>;

    fn outbox_records(&self) -> Result<Vec<OutboxRecord>, RepositoryError>;

    fn outbox_stats(&self) -> Result<OutboxStats, RepositoryError>;
}
