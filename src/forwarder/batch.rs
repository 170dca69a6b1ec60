use crate::enrich::EnrichedRecord;
use crate::labels::Fingerprint;
use crate::protocol::{to_unix_nanos, PushRequest, StreamValues};
use std::collections::HashMap;
use uuid::Uuid;

/// Records bound for one push. Owned by the forwarder until acknowledged.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Unique batch ID, carried in logs
    pub batch_id: Uuid,

    /// Lane that built this batch
    pub lane: usize,

    /// Records in arrival order
    pub records: Vec<EnrichedRecord>,

    /// Sum of line lengths
    pub bytes: usize,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Group records per stream, keeping arrival order inside each stream.
    pub fn to_push_request(&self) -> PushRequest {
        let mut positions: HashMap<Fingerprint, usize> = HashMap::new();
        let mut streams: Vec<StreamValues> = Vec::new();

        for record in &self.records {
            let index = *positions.entry(record.labels.fingerprint()).or_insert_with(|| {
                streams.push(StreamValues {
                    stream: record.labels.clone(),
                    values: Vec::new(),
                });
                streams.len() - 1
            });
            streams[index]
                .values
                .push((to_unix_nanos(record.timestamp), record.line.clone()));
        }

        PushRequest { streams }
    }
}
