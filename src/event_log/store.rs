use super::record::EventLogRecord;
use crate::domain::RepositoryError;

/// Reads and out-of-transaction writes on the event log.
///
/// Rows are unique per `(consumer, event_id)`, so consumers sharing a store
/// deduplicate independently. Processed rows are written only through a
/// commit, together with the effects they record.
pub trait EventLogStore: Send + Sync {
    fn event_log(
        &self,
        consumer: &str,
        event_id: &str,
    ) -> Result<Option<EventLogRecord>, RepositoryError>;

    /// Upsert a Failed row, incrementing the stored retry count. A Processed
    /// row is never downgraded; it is returned unchanged instead.
    fn record_event_failure(&self, record: EventLogRecord) -> Result<EventLogRecord, RepositoryError>;
}
