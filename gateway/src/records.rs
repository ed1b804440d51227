//! Completion records handed to the persistence layer.

use relay_common::CompletionRecord;
use tokio::sync::broadcast;

/// Records buffered for slow subscribers before they start lagging.
const CHANNEL_CAPACITY: usize = 256;

/// Broadcast of every completed exchange. Publishing with no subscriber
/// is fine; the record is simply dropped.
#[derive(Clone)]
pub struct CompletionRecords {
    sender: broadcast::Sender<CompletionRecord>,
}

impl CompletionRecords {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CompletionRecord> {
        self.sender.subscribe()
    }

    pub fn publish(&self, record: CompletionRecord) {
        tracing::debug!(
            record_id = %record.id,
            account_id = %record.account_id,
            backend = %record.backend_used,
            token_count = record.token_count,
            fallback = record.fallback,
            "Completion recorded"
        );
        let _ = self.sender.send(record);
    }
}

impl Default for CompletionRecords {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_common::BackendId;

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let records = CompletionRecords::new();
        records.publish(CompletionRecord::new("a".into(), BackendId::General, "hi".into(), false));
    }

    #[tokio::test]
    async fn test_subscriber_receives_record() {
        let records = CompletionRecords::new();
        let mut rx = records.subscribe();
        records.publish(CompletionRecord::new("a".into(), BackendId::Coder, "two words".into(), true));

        let record = rx.recv().await.unwrap();
        assert_eq!(record.account_id, "a");
        assert_eq!(record.backend_used, BackendId::Coder);
        assert_eq!(record.token_count, 2);
        assert!(record.fallback);
    }
}
