use crate::config::types::IngestConfig;
use crate::labels::{Fingerprint, LabelSet};
use crate::metrics::{add, incr, StoreCounters};
use crate::protocol::{parse_timestamp, PushRequest};
use crate::store::index::{Entry, StreamIndex};
use crate::store::relations::{RelationCheck, RelationRegistry};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IngestError {
    #[error("stream {index} has no labels")]
    EmptyLabels { index: usize },

    #[error("stream {stream} is missing required labels: {}", .missing.join(", "))]
    MissingLabels { stream: String, missing: Vec<String> },

    #[error("stream {stream} has invalid label name '{name}'")]
    InvalidLabelName { stream: String, name: String },

    #[error("stream {stream} has unparseable timestamp '{value}'")]
    InvalidTimestamp { stream: String, value: String },

    #[error("stream {stream}: entry at {timestamp} is older than newest entry {newest} minus {max_age:?}")]
    TooOld {
        stream: String,
        timestamp: DateTime<Utc>,
        newest: DateTime<Utc>,
        max_age: Duration,
    },

    #[error("stream {stream}: entry at {timestamp} is more than {grace:?} in the future")]
    TooNew {
        stream: String,
        timestamp: DateTime<Utc>,
        grace: Duration,
    },

    #[error("stream {stream}: line of {len} bytes exceeds max_line_size {max}")]
    LineTooLong { stream: String, len: usize, max: usize },

    #[error("stream {stream}: no relation registered for application '{application}'")]
    UnknownRelation { stream: String, application: String },

    #[error("stream {stream}: {label}=\"{actual}\" does not match relation value \"{expected}\" for application '{application}'")]
    TopologyMismatch {
        stream: String,
        application: String,
        label: &'static str,
        expected: String,
        actual: String,
    },
}

/// Acknowledgement of an accepted push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub streams: usize,
    pub entries: usize,
}

struct PendingStream {
    labels: LabelSet,
    entries: Vec<Entry>,
}

/// Validates pushed batches and appends them to the index.
///
/// A batch is checked in full before anything is written, so a rejected
/// batch leaves no partial trace.
pub struct Ingester {
    config: IngestConfig,
    index: Arc<StreamIndex>,
    relations: Arc<RelationRegistry>,
    counters: Arc<StoreCounters>,
}

impl Ingester {
    pub fn new(
        config: IngestConfig,
        index: Arc<StreamIndex>,
        relations: Arc<RelationRegistry>,
        counters: Arc<StoreCounters>,
    ) -> Self {
        Self {
            config,
            index,
            relations,
            counters,
        }
    }

    pub fn push(&self, request: &PushRequest) -> Result<Ack, IngestError> {
        self.push_at(request, Utc::now())
    }

    pub fn push_at(&self, request: &PushRequest, now: DateTime<Utc>) -> Result<Ack, IngestError> {
        let pending = match self.validate(request, now) {
            Ok(pending) => pending,
            Err(e) => {
                incr(&self.counters.pushes_rejected);
                return Err(e);
            }
        };

        let streams = pending.len();
        let mut entries = 0;
        for stream in pending {
            entries += self.index.get_or_create(&stream.labels).append(stream.entries);
        }

        incr(&self.counters.pushes_accepted);
        add(&self.counters.entries_ingested, entries as u64);
        Ok(Ack { streams, entries })
    }

    fn validate(&self, request: &PushRequest, now: DateTime<Utc>) -> Result<Vec<PendingStream>, IngestError> {
        // Streams repeated within one request are merged in order
        let mut positions: HashMap<Fingerprint, usize> = HashMap::new();
        let mut pending: Vec<PendingStream> = Vec::new();

        for (index, stream) in request.streams.iter().enumerate() {
            let labels = &stream.stream;
            self.validate_labels(index, labels)?;
            let name = labels.to_string();

            let mut entries = Vec::with_capacity(stream.values.len());
            for (raw_ts, line) in &stream.values {
                let timestamp = parse_timestamp(raw_ts).ok_or_else(|| IngestError::InvalidTimestamp {
                    stream: name.clone(),
                    value: raw_ts.clone(),
                })?;
                if line.len() > self.config.max_line_size {
                    return Err(IngestError::LineTooLong {
                        stream: name,
                        len: line.len(),
                        max: self.config.max_line_size,
                    });
                }
                entries.push(Entry::new(timestamp, line.clone()));
            }

            let slot = *positions.entry(labels.fingerprint()).or_insert_with(|| {
                pending.push(PendingStream {
                    labels: labels.clone(),
                    entries: Vec::new(),
                });
                pending.len() - 1
            });
            pending[slot].entries.extend(entries);
        }

        for stream in &pending {
            self.validate_timestamps(stream, now)?;
        }
        Ok(pending)
    }

    fn validate_labels(&self, index: usize, labels: &LabelSet) -> Result<(), IngestError> {
        if labels.is_empty() {
            return Err(IngestError::EmptyLabels { index });
        }

        if let Some(name) = labels.first_invalid_name() {
            return Err(IngestError::InvalidLabelName {
                stream: labels.to_string(),
                name: name.to_string(),
            });
        }

        let missing = labels.missing(&self.config.required_labels);
        if !missing.is_empty() {
            return Err(IngestError::MissingLabels {
                stream: labels.to_string(),
                missing,
            });
        }

        match self.relations.check(labels) {
            RelationCheck::Consistent => Ok(()),
            RelationCheck::Unknown { application } => {
                if self.config.require_relation {
                    Err(IngestError::UnknownRelation {
                        stream: labels.to_string(),
                        application,
                    })
                } else {
                    Ok(())
                }
            }
            RelationCheck::Mismatch {
                application,
                label,
                expected,
                actual,
            } => Err(IngestError::TopologyMismatch {
                stream: labels.to_string(),
                application,
                label,
                expected,
                actual,
            }),
        }
    }

    /// Entries may not lag the stream's newest entry (stored or in this
    /// batch) by more than `reject_old_samples_max_age`, nor lead the clock
    /// by more than `creation_grace_period`.
    fn validate_timestamps(&self, stream: &PendingStream, now: DateTime<Utc>) -> Result<(), IngestError> {
        let max_age = self.config.reject_old_samples_max_age;
        let grace = self.config.creation_grace_period;
        let latest_allowed = now.checked_add_signed(to_chrono(grace));

        let stored_newest = self.index.get(&stream.labels.fingerprint()).and_then(|s| s.newest());
        let batch_newest = stream.entries.iter().map(|e| e.timestamp).max();
        let newest = stored_newest.max(batch_newest);

        for entry in &stream.entries {
            if latest_allowed.is_some_and(|latest| entry.timestamp > latest) {
                return Err(IngestError::TooNew {
                    stream: stream.labels.to_string(),
                    timestamp: entry.timestamp,
                    grace,
                });
            }
            if let Some(newest) = newest {
                let oldest_allowed = newest.checked_sub_signed(to_chrono(max_age));
                if oldest_allowed.is_some_and(|oldest| entry.timestamp < oldest) {
                    return Err(IngestError::TooOld {
                        stream: stream.labels.to_string(),
                        timestamp: entry.timestamp,
                        newest,
                        max_age,
                    });
                }
            }
        }
        Ok(())
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::weeks(52 * 1000))
}
