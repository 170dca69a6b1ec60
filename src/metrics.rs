use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Health counters shared between the agent tasks.
///
/// Persistent forwarding failure shows up here rather than as a crash.
#[derive(Debug, Default)]
pub struct AgentCounters {
    pub records_read: AtomicU64,
    pub read_errors: AtomicU64,
    pub rotations: AtomicU64,
    pub truncations: AtomicU64,
    pub syslog_received: AtomicU64,
    pub syslog_dropped: AtomicU64,
    /// Records handed to the forwarder
    pub records_forwarded: AtomicU64,
    pub batches_sent: AtomicU64,
    pub batch_retries: AtomicU64,
    pub batches_lost: AtomicU64,
    pub batches_rejected: AtomicU64,
    pub records_sent: AtomicU64,
    pub records_lost: AtomicU64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AgentCountersSnapshot {
    pub records_read: u64,
    pub read_errors: u64,
    pub rotations: u64,
    pub truncations: u64,
    pub syslog_received: u64,
    pub syslog_dropped: u64,
    pub records_forwarded: u64,
    pub batches_sent: u64,
    pub batch_retries: u64,
    pub batches_lost: u64,
    pub batches_rejected: u64,
    pub records_sent: u64,
    pub records_lost: u64,
}

impl AgentCounters {
    pub fn snapshot(&self) -> AgentCountersSnapshot {
        AgentCountersSnapshot {
            records_read: load(&self.records_read),
            read_errors: load(&self.read_errors),
            rotations: load(&self.rotations),
            truncations: load(&self.truncations),
            syslog_received: load(&self.syslog_received),
            syslog_dropped: load(&self.syslog_dropped),
            records_forwarded: load(&self.records_forwarded),
            batches_sent: load(&self.batches_sent),
            batch_retries: load(&self.batch_retries),
            batches_lost: load(&self.batches_lost),
            batches_rejected: load(&self.batches_rejected),
            records_sent: load(&self.records_sent),
            records_lost: load(&self.records_lost),
        }
    }

    /// Records the forwarder accepted but has neither sent nor written off.
    pub fn records_in_flight(&self) -> u64 {
        load(&self.records_forwarded)
            .saturating_sub(load(&self.records_sent))
            .saturating_sub(load(&self.records_lost))
    }
}

/// Counters kept by the store side.
#[derive(Debug, Default)]
pub struct StoreCounters {
    pub pushes_accepted: AtomicU64,
    pub pushes_rejected: AtomicU64,
    pub entries_ingested: AtomicU64,
    pub queries: AtomicU64,
    pub alerts_fired: AtomicU64,
    pub alerts_suppressed: AtomicU64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StoreCountersSnapshot {
    pub pushes_accepted: u64,
    pub pushes_rejected: u64,
    pub entries_ingested: u64,
    pub queries: u64,
    pub alerts_fired: u64,
    pub alerts_suppressed: u64,
}

impl StoreCounters {
    pub fn snapshot(&self) -> StoreCountersSnapshot {
        StoreCountersSnapshot {
            pushes_accepted: load(&self.pushes_accepted),
            pushes_rejected: load(&self.pushes_rejected),
            entries_ingested: load(&self.entries_ingested),
            queries: load(&self.queries),
            alerts_fired: load(&self.alerts_fired),
            alerts_suppressed: load(&self.alerts_suppressed),
        }
    }
}

pub fn incr(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

pub fn add(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}

fn load(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}
