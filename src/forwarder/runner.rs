use crate::config::types::ForwarderConfig;
use crate::enrich::EnrichedRecord;
use crate::forwarder::batch::Batch;
use crate::forwarder::batcher::Batcher;
use crate::forwarder::client::{PushError, PushTransport};
use crate::labels::Fingerprint;
use crate::metrics::{add, incr, AgentCounters};
use crate::retry::{attempt_with_policy, Failure, RetryError, RetryPolicy};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

const LANE_CHANNEL_CAPACITY: usize = 1024;

/// Stable lane for a stream; every record of one stream goes through the same lane.
pub fn lane_for(fingerprint: &Fingerprint, lanes: usize) -> usize {
    let digest = Sha256::digest(fingerprint.as_str().as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % lanes.max(1) as u64) as usize
}

/// Routes enriched records onto sequential lanes and pushes their batches.
///
/// Each lane has a batcher task and a sender task. The sender pushes one
/// batch at a time, so batches of a stream reach the store in the order
/// they were cut, retries included. The batcher keeps accepting records
/// while the sender retries; batches that overflow the lane's queue are
/// dropped and counted as lost.
pub struct Forwarder {
    config: ForwarderConfig,
    transport: Arc<dyn PushTransport>,
    counters: Arc<AgentCounters>,
}

impl Forwarder {
    pub fn new(config: ForwarderConfig, transport: Arc<dyn PushTransport>, counters: Arc<AgentCounters>) -> Self {
        Self {
            config,
            transport,
            counters,
        }
    }

    /// Run until `input` closes, then flush every lane and wait for its sender.
    pub async fn run(self, mut input: mpsc::Receiver<EnrichedRecord>) {
        let lanes = self.config.lanes.max(1);
        let policy = RetryPolicy::from_config(&self.config.retry);
        info!(lanes, batch_size = self.config.batch_size, "Starting forwarder");

        let mut lane_txs = Vec::with_capacity(lanes);
        let mut tasks = Vec::with_capacity(lanes * 2);

        for lane in 0..lanes {
            let (record_tx, record_rx) = mpsc::channel(LANE_CHANNEL_CAPACITY);
            let (batch_tx, batch_rx) = mpsc::channel(self.config.max_pending_batches.max(1));
            lane_txs.push(record_tx);

            tasks.push(tokio::spawn(run_lane_batcher(
                Batcher::from_config(lane, &self.config),
                record_rx,
                batch_tx,
                Arc::clone(&self.counters),
            )));
            tasks.push(tokio::spawn(run_lane_sender(
                lane,
                batch_rx,
                Arc::clone(&self.transport),
                policy.clone(),
                Arc::clone(&self.counters),
            )));
        }

        while let Some(record) = input.recv().await {
            incr(&self.counters.records_forwarded);
            let lane = lane_for(&record.labels.fingerprint(), lanes);
            if lane_txs[lane].send(record).await.is_err() {
                error!(lane, "Forwarder lane stopped unexpectedly");
                break;
            }
        }

        debug!("Forwarder input closed, flushing lanes");
        drop(lane_txs);

        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                error!(error = %e, "Forwarder lane task join error");
            }
        }
        info!("Forwarder stopped");
    }
}

async fn run_lane_batcher(
    mut batcher: Batcher,
    mut records: mpsc::Receiver<EnrichedRecord>,
    batches: mpsc::Sender<Batch>,
    counters: Arc<AgentCounters>,
) {
    loop {
        let deadline = batcher.deadline();
        let completed = tokio::select! {
            maybe = records.recv() => match maybe {
                Some(record) => batcher.push(record),
                None => break,
            },
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => batcher.flush(),
        };

        if let Some(batch) = completed {
            enqueue(&batches, batch, &counters);
        }
    }

    // Shutdown: the last partial batch still goes out
    if let Some(batch) = batcher.flush() {
        enqueue(&batches, batch, &counters);
    }
}

fn enqueue(batches: &mpsc::Sender<Batch>, batch: Batch, counters: &AgentCounters) {
    match batches.try_send(batch) {
        Ok(()) => {}
        Err(TrySendError::Full(batch)) | Err(TrySendError::Closed(batch)) => {
            incr(&counters.batches_lost);
            add(&counters.records_lost, batch.len() as u64);
            warn!(
                lane = batch.lane,
                batch_id = %batch.batch_id,
                records = batch.len(),
                "Lane queue full, dropping batch"
            );
        }
    }
}

async fn run_lane_sender(
    lane: usize,
    mut batches: mpsc::Receiver<Batch>,
    transport: Arc<dyn PushTransport>,
    policy: RetryPolicy,
    counters: Arc<AgentCounters>,
) {
    while let Some(batch) = batches.recv().await {
        send_batch(&batch, transport.as_ref(), &policy, &counters).await;
    }
    debug!(lane, "Lane sender finished");
}

/// Push one batch under the retry policy and account for the outcome.
pub async fn send_batch(batch: &Batch, transport: &dyn PushTransport, policy: &RetryPolicy, counters: &AgentCounters) {
    let request = batch.to_push_request();
    let records = batch.len() as u64;

    let result = attempt_with_policy(
        policy,
        |_attempt| {
            let request = &request;
            async move {
                transport.push(request).await.map_err(|e| {
                    if e.is_transient() {
                        Failure::Transient(e)
                    } else {
                        Failure::Permanent(e)
                    }
                })
            }
        },
        |attempt, err: &PushError, delay| {
            incr(&counters.batch_retries);
            warn!(
                lane = batch.lane,
                batch_id = %batch.batch_id,
                attempt,
                backoff_ms = delay.as_millis() as u64,
                error = %err,
                "Push failed, retrying"
            );
        },
    )
    .await;

    match result {
        Ok(()) => {
            incr(&counters.batches_sent);
            add(&counters.records_sent, records);
            debug!(lane = batch.lane, batch_id = %batch.batch_id, records, "Batch delivered");
        }
        Err(RetryError::Permanent(e)) => {
            incr(&counters.batches_rejected);
            add(&counters.records_lost, records);
            error!(lane = batch.lane, batch_id = %batch.batch_id, records, error = %e, "Store rejected batch");
        }
        Err(RetryError::Exhausted { attempts, elapsed, last }) => {
            incr(&counters.batches_lost);
            add(&counters.records_lost, records);
            error!(
                lane = batch.lane,
                batch_id = %batch.batch_id,
                records,
                attempts,
                elapsed_ms = elapsed.as_millis() as u64,
                error = %last,
                "Retry budget exhausted, batch lost"
            );
        }
    }
}
