use crate::config::types::ForwarderConfig;
use crate::enrich::EnrichedRecord;
use crate::forwarder::batch::Batch;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Accumulates records for one lane and cuts a batch on whichever limit
/// trips first: record count, line bytes or age of the oldest record.
pub struct Batcher {
    lane: usize,
    max_records: usize,
    max_bytes: usize,
    max_wait: Duration,
    current: Option<BatchBuilder>,
}

struct BatchBuilder {
    opened_at: Instant,
    records: Vec<EnrichedRecord>,
    bytes: usize,
}

impl Batcher {
    pub fn new(lane: usize, max_records: usize, max_bytes: usize, max_wait: Duration) -> Self {
        Self {
            lane,
            max_records: max_records.max(1),
            max_bytes: max_bytes.max(1),
            max_wait,
            current: None,
        }
    }

    pub fn from_config(lane: usize, config: &ForwarderConfig) -> Self {
        Self::new(lane, config.batch_size, config.batch_bytes, config.batch_wait)
    }

    /// Add a record. Returns a completed batch when a size limit is reached.
    pub fn push(&mut self, record: EnrichedRecord) -> Option<Batch> {
        let builder = self.current.get_or_insert_with(|| BatchBuilder {
            opened_at: Instant::now(),
            records: Vec::new(),
            bytes: 0,
        });

        builder.bytes += record.line.len();
        builder.records.push(record);

        if builder.records.len() >= self.max_records || builder.bytes >= self.max_bytes {
            self.flush()
        } else {
            None
        }
    }

    /// When the open batch must be sent regardless of size.
    pub fn deadline(&self) -> Option<Instant> {
        self.current.as_ref().map(|b| b.opened_at + self.max_wait)
    }

    pub fn pending(&self) -> usize {
        self.current.as_ref().map_or(0, |b| b.records.len())
    }

    /// Close the open batch, if any (deadline reached or shutdown).
    pub fn flush(&mut self) -> Option<Batch> {
        let builder = self.current.take()?;
        Some(Batch {
            batch_id: Uuid::new_v4(),
            lane: self.lane,
            records: builder.records,
            bytes: builder.bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::LabelSet;
    use chrono::Utc;

    fn make_record(text: &str) -> EnrichedRecord {
        EnrichedRecord {
            labels: [("job", "file")].into_iter().collect::<LabelSet>(),
            timestamp: Utc::now(),
            line: text.to_string(),
        }
    }

    #[test]
    fn test_cuts_on_record_count() {
        let mut batcher = Batcher::new(2, 3, 1024, Duration::from_secs(60));

        assert!(batcher.push(make_record("log1")).is_none());
        assert!(batcher.push(make_record("log2")).is_none());
        let batch = batcher.push(make_record("log3")).unwrap();

        assert_eq!(batch.len(), 3);
        assert_eq!(batch.lane, 2);
        assert_eq!(batch.records[0].line, "log1");
        assert_eq!(batch.records[2].line, "log3");
        assert_eq!(batcher.pending(), 0);
        assert!(batcher.deadline().is_none());
    }

    #[test]
    fn test_cuts_on_bytes() {
        let mut batcher = Batcher::new(0, 100, 10, Duration::from_secs(60));

        assert!(batcher.push(make_record("12345")).is_none());
        let batch = batcher.push(make_record("67890")).unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.bytes, 10);
    }

    #[test]
    fn test_flush_returns_partial_batch() {
        let mut batcher = Batcher::new(0, 100, 1024, Duration::from_millis(50));
        assert!(batcher.flush().is_none());

        batcher.push(make_record("only"));
        let deadline = batcher.deadline().unwrap();
        assert!(deadline > Instant::now());

        let batch = batcher.flush().unwrap();
        assert_eq!(batch.len(), 1);
        assert!(batcher.flush().is_none());
    }

    #[test]
    fn test_batch_ids_are_unique() {
        let mut batcher = Batcher::new(0, 1, 1024, Duration::from_secs(1));
        let a = batcher.push(make_record("a")).unwrap();
        let b = batcher.push(make_record("b")).unwrap();
        assert_ne!(a.batch_id, b.batch_id);
    }
}
