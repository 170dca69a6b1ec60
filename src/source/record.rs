use crate::labels::LabelSet;
use chrono::{DateTime, Utc};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Instant;

/// A single line read from a source. Immutable once created.
#[derive(Debug, Clone)]
pub struct LogRecord {
    /// Wall-clock time of the record (extracted from the line when configured)
    pub timestamp: DateTime<Utc>,
    /// Monotonic time the watcher produced the record
    pub observed_at: Instant,
    pub raw: Vec<u8>,
    pub origin: Origin,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    File {
        path: PathBuf,
    },
    Syslog {
        peer: SocketAddr,
        /// Labels derived from the syslog header and structured data
        fields: LabelSet,
    },
}

impl LogRecord {
    pub fn new(timestamp: DateTime<Utc>, raw: Vec<u8>, origin: Origin) -> Self {
        Self {
            timestamp,
            observed_at: Instant::now(),
            raw,
            origin,
        }
    }
}
