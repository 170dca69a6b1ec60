use crate::config::types::{FileSourceConfig, ReadConfig, ReadStart};
use crate::metrics::{incr, AgentCounters};
use crate::retry::RetryPolicy;
use crate::source::record::{LogRecord, Origin};
use crate::source::rotation::{EofProbe, FileIdentity, RotationAction, RotationEvent, RotationTracker};
use crate::source::timestamp::{TimestampError, TimestampExtractor};
use chrono::Utc;
use futures::Stream;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("io error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("timestamp error: {0}")]
    Timestamp(#[from] TimestampError),
}

/// Tails one file, following rotation and truncation.
pub struct FileWatcher {
    path: PathBuf,
    read_config: ReadConfig,
    timestamp_extractor: Option<TimestampExtractor>,
    reopen_policy: RetryPolicy,
    counters: Arc<AgentCounters>,

    file: Option<BufReader<File>>,
    offset: u64,
    partial: Vec<u8>,
    tracker: RotationTracker,
    opened_once: bool,
    open_failures: u32,
}

impl FileWatcher {
    pub fn new(config: &FileSourceConfig, counters: Arc<AgentCounters>) -> Result<Self, ReaderError> {
        let timestamp_extractor = config
            .timestamp
            .as_ref()
            .map(|ts| TimestampExtractor::new(&ts.pattern, &ts.format))
            .transpose()?;

        Ok(Self {
            path: config.path.clone(),
            read_config: config.read.clone(),
            timestamp_extractor,
            reopen_policy: RetryPolicy::unbounded(Duration::from_millis(250), Duration::from_secs(30)),
            counters,
            file: None,
            offset: 0,
            partial: Vec::new(),
            tracker: RotationTracker::new(),
            opened_once: false,
            open_failures: 0,
        })
    }

    pub fn with_reopen_policy(mut self, policy: RetryPolicy) -> Self {
        self.reopen_policy = policy;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Byte offset of the next unread byte in the held file.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn tracker(&self) -> &RotationTracker {
        &self.tracker
    }

    /// Open the path. The configured start position only applies to the
    /// very first open; files that appear after rotation are read from 0.
    pub fn open(&mut self) -> Result<(), ReaderError> {
        let file = File::open(&self.path).map_err(|e| self.io_error(e))?;
        let metadata = file.metadata().map_err(|e| self.io_error(e))?;
        let identity = FileIdentity::from_metadata(&metadata);

        let mut reader = BufReader::new(file);
        let start_at_end = !self.opened_once && self.read_config.start == ReadStart::End;
        self.offset = if start_at_end {
            reader.seek(SeekFrom::End(0)).map_err(|e| self.io_error(e))?
        } else {
            0
        };

        self.file = Some(reader);
        self.opened_once = true;
        self.open_failures = 0;
        self.partial.clear();

        let event = self.tracker.opened(identity);
        self.log_event(&event);
        Ok(())
    }

    /// Next complete line. Returns `Ok(None)` only when not following and the
    /// file is exhausted.
    pub async fn next_record(&mut self) -> Result<Option<LogRecord>, ReaderError> {
        loop {
            if self.file.is_none() {
                if let Err(e) = self.open() {
                    if !self.read_config.follow {
                        return Err(e);
                    }
                    self.open_failures += 1;
                    incr(&self.counters.read_errors);
                    let delay = self.reopen_policy.delay_for(self.open_failures);
                    warn!(
                        path = %self.path.display(),
                        attempt = self.open_failures,
                        backoff_ms = delay.as_millis() as u64,
                        error = %e,
                        "Cannot open log file, retrying"
                    );
                    sleep(delay).await;
                    continue;
                }
            }

            let bytes_read = match self.read_chunk() {
                Ok(n) => n,
                Err(e) => {
                    incr(&self.counters.read_errors);
                    warn!(path = %self.path.display(), error = %e, "Read failed, reopening");
                    self.file = None;
                    sleep(self.reopen_policy.delay_for(1)).await;
                    continue;
                }
            };

            if bytes_read > 0 {
                if self.partial.last() == Some(&b'\n') {
                    let line = std::mem::take(&mut self.partial);
                    return Ok(Some(self.make_record(line)));
                }
                // Incomplete line at EOF; wait for the writer to finish it
                continue;
            }

            if !self.read_config.follow {
                if self.partial.is_empty() {
                    return Ok(None);
                }
                let line = std::mem::take(&mut self.partial);
                return Ok(Some(self.make_record(line)));
            }

            let transition = self.tracker.on_eof(self.probe());
            if let Some(event) = &transition.event {
                self.log_event(event);
            }

            match transition.action {
                RotationAction::Wait => sleep(self.read_config.poll_interval).await,
                RotationAction::Drain => {}
                RotationAction::SeekStart => {
                    if let Some(file) = self.file.as_mut() {
                        if let Err(e) = file.seek(SeekFrom::Start(0)) {
                            warn!(path = %self.path.display(), error = %e, "Seek after truncation failed");
                            self.file = None;
                        }
                    }
                    self.offset = 0;
                    self.partial.clear();
                }
                RotationAction::Reopen => {
                    self.file = None;
                    self.offset = 0;
                    if !self.partial.is_empty() {
                        // Unterminated tail of the rotated file
                        let line = std::mem::take(&mut self.partial);
                        return Ok(Some(self.make_record(line)));
                    }
                }
            }
        }
    }

    /// Convert into a lazy stream of records.
    pub fn into_stream(self) -> impl Stream<Item = Result<LogRecord, ReaderError>> {
        futures::stream::unfold(self, |mut watcher| async move {
            match watcher.next_record().await {
                Ok(Some(record)) => Some((Ok(record), watcher)),
                Ok(None) => None,
                Err(e) => Some((Err(e), watcher)),
            }
        })
    }

    fn read_chunk(&mut self) -> std::io::Result<usize> {
        let Some(file) = self.file.as_mut() else {
            return Ok(0);
        };
        let n = file.read_until(b'\n', &mut self.partial)?;
        self.offset += n as u64;
        Ok(n)
    }

    fn probe(&self) -> EofProbe {
        let path_identity = match std::fs::metadata(&self.path) {
            Ok(metadata) => Some(FileIdentity::from_metadata(&metadata)),
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    debug!(path = %self.path.display(), error = %e, "Cannot stat watched path");
                }
                None
            }
        };

        let handle_len = self
            .file
            .as_ref()
            .and_then(|f| f.get_ref().metadata().ok())
            .map(|m| m.len())
            .unwrap_or(0);

        EofProbe {
            path_identity,
            handle_len,
            offset: self.offset,
        }
    }

    fn make_record(&self, mut line: Vec<u8>) -> LogRecord {
        while matches!(line.last(), Some(b'\n') | Some(b'\r')) {
            line.pop();
        }
        incr(&self.counters.records_read);

        let timestamp = self
            .timestamp_extractor
            .as_ref()
            .and_then(|extractor| match extractor.extract(&String::from_utf8_lossy(&line)) {
                Ok(ts) => ts,
                Err(e) => {
                    debug!(path = %self.path.display(), error = %e, "Timestamp extraction failed");
                    None
                }
            })
            .unwrap_or_else(Utc::now);

        LogRecord::new(
            timestamp,
            line,
            Origin::File {
                path: self.path.clone(),
            },
        )
    }

    fn log_event(&self, event: &RotationEvent) {
        match event {
            RotationEvent::Opened { identity } => {
                info!(path = %self.path.display(), inode = identity.inode, offset = self.offset, "Watching log file")
            }
            RotationEvent::Truncated { offset, len } => {
                incr(&self.counters.truncations);
                info!(path = %self.path.display(), offset, len, "Log file truncated, reading from start")
            }
            RotationEvent::RotationDetected { old, new } => {
                incr(&self.counters.rotations);
                info!(
                    path = %self.path.display(),
                    old_inode = old.inode,
                    new_inode = new.map(|id| id.inode),
                    "Log file rotated, draining old file"
                )
            }
            RotationEvent::Reopened { identity } => {
                info!(path = %self.path.display(), inode = identity.inode, "Reopened rotated log file")
            }
            RotationEvent::Settled => {}
        }
    }

    fn io_error(&self, source: std::io::Error) -> ReaderError {
        ReaderError::Io {
            path: self.path.clone(),
            source,
        }
    }
}
