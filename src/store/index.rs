use crate::labels::{Fingerprint, LabelSet};
use crate::store::selector::Selector;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub timestamp: DateTime<Utc>,
    pub line: String,
}

impl Entry {
    pub fn new(timestamp: DateTime<Utc>, line: impl Into<String>) -> Self {
        Self {
            timestamp,
            line: line.into(),
        }
    }
}

/// Half-open time range `[start, end)`; an open side is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start.map_or(true, |start| ts >= start) && self.end.map_or(true, |end| ts < end)
    }
}

/// Append-only log of one label set, ordered by timestamp then arrival.
#[derive(Debug)]
pub struct Stream {
    labels: LabelSet,
    fingerprint: Fingerprint,
    entries: RwLock<Vec<Entry>>,
}

impl Stream {
    fn new(labels: LabelSet) -> Self {
        Self {
            fingerprint: labels.fingerprint(),
            labels,
            entries: RwLock::new(Vec::new()),
        }
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Insert entries keeping timestamp order. Equal timestamps keep the
    /// order in which they arrived.
    pub fn append<I>(&self, entries: I) -> usize
    where
        I: IntoIterator<Item = Entry>,
    {
        let mut log = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let mut appended = 0;
        for entry in entries {
            let in_order = log.last().map_or(true, |last| last.timestamp <= entry.timestamp);
            if in_order {
                log.push(entry);
            } else {
                let at = log.partition_point(|e| e.timestamp <= entry.timestamp);
                log.insert(at, entry);
            }
            appended += 1;
        }
        appended
    }

    pub fn newest(&self) -> Option<DateTime<Utc>> {
        self.read().last().map(|e| e.timestamp)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the entries inside `range`, in stream order.
    pub fn snapshot(&self, range: &TimeRange) -> Vec<Entry> {
        let log = self.read();
        let (from, to) = bounds(&log, range);
        log[from..to].to_vec()
    }

    pub fn count_in(&self, range: &TimeRange) -> usize {
        let log = self.read();
        let (from, to) = bounds(&log, range);
        to - from
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Entry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }
}

fn bounds(log: &[Entry], range: &TimeRange) -> (usize, usize) {
    let from = range
        .start
        .map_or(0, |start| log.partition_point(|e| e.timestamp < start));
    let to = range
        .end
        .map_or(log.len(), |end| log.partition_point(|e| e.timestamp < end));
    (from, to.max(from))
}

/// Fingerprint → stream map. The map lock is only held to look up or
/// insert a stream; appends and reads lock the stream itself.
#[derive(Debug, Default)]
pub struct StreamIndex {
    streams: RwLock<HashMap<Fingerprint, Arc<Stream>>>,
}

impl StreamIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<Arc<Stream>> {
        self.streams
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(fingerprint)
            .cloned()
    }

    pub fn get_or_create(&self, labels: &LabelSet) -> Arc<Stream> {
        let fingerprint = labels.fingerprint();
        if let Some(stream) = self.get(&fingerprint) {
            return stream;
        }

        let mut streams = self.streams.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            streams
                .entry(fingerprint)
                .or_insert_with(|| Arc::new(Stream::new(labels.clone()))),
        )
    }

    /// Streams whose labels satisfy `selector`, ordered by fingerprint.
    pub fn select(&self, selector: &Selector) -> Vec<Arc<Stream>> {
        let mut matched: Vec<Arc<Stream>> = self
            .streams
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|s| selector.matches(s.labels()))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.fingerprint().cmp(b.fingerprint()));
        matched
    }

    fn all(&self) -> Vec<Arc<Stream>> {
        self.streams
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn stream_count(&self) -> usize {
        self.streams.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn entry_count(&self) -> usize {
        self.all().iter().map(|s| s.len()).sum()
    }

    pub fn label_names(&self) -> Vec<String> {
        let names: BTreeSet<String> = self
            .all()
            .iter()
            .flat_map(|s| s.labels().names().map(str::to_string).collect::<Vec<_>>())
            .collect();
        names.into_iter().collect()
    }

    pub fn label_values(&self, name: &str) -> Vec<String> {
        let values: BTreeSet<String> = self
            .all()
            .iter()
            .filter_map(|s| s.labels().get(name).map(str::to_string))
            .collect();
        values.into_iter().collect()
    }
}
