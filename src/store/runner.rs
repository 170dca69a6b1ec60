use crate::config::types::StoreConfig;
use crate::metrics::StoreCounters;
use crate::store::alert::{Alert, AlertBoard, AlertEvaluator};
use crate::store::api::StoreState;
use crate::store::index::StreamIndex;
use crate::store::ingest::Ingester;
use crate::store::relations::RelationRegistry;
use crate::store::selector::SelectorError;
use crate::store::server::serve;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid alert rule selector: {0}")]
    AlertRule(#[from] SelectorError),

    #[error("server error: {0}")]
    Server(#[from] std::io::Error),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Ingest endpoint, stream index, query API and alert evaluator in one
/// process.
pub struct StoreRunner {
    config: StoreConfig,
    index: Arc<StreamIndex>,
    relations: Arc<RelationRegistry>,
    board: Arc<AlertBoard>,
    counters: Arc<StoreCounters>,
}

impl StoreRunner {
    pub fn new(config: StoreConfig) -> Self {
        let relations = Arc::new(RelationRegistry::from_config(&config.relations));
        Self {
            config,
            index: Arc::new(StreamIndex::new()),
            relations,
            board: Arc::new(AlertBoard::default()),
            counters: Arc::new(StoreCounters::default()),
        }
    }

    pub fn index(&self) -> Arc<StreamIndex> {
        self.index.clone()
    }

    pub fn counters(&self) -> Arc<StoreCounters> {
        self.counters.clone()
    }

    pub fn board(&self) -> Arc<AlertBoard> {
        self.board.clone()
    }

    pub async fn run(self, cancel: CancellationToken) -> Result<(), StoreError> {
        let listener = TcpListener::bind(&self.config.listen)
            .await
            .map_err(|source| StoreError::Bind {
                addr: self.config.listen.clone(),
                source,
            })?;
        self.run_with_listener(listener, cancel).await
    }

    /// Run on an already-bound listener. Returns once `cancel` fires and the
    /// server and evaluator have stopped.
    pub async fn run_with_listener(self, listener: TcpListener, cancel: CancellationToken) -> Result<(), StoreError> {
        info!(
            relations = self.relations.list().len(),
            rules = self.config.alerting.rules.len(),
            "Starting store mode"
        );

        let (alert_tx, alert_rx) = mpsc::channel(self.config.alerting.channel_capacity.max(1));
        let evaluator = AlertEvaluator::new(
            &self.config.alerting,
            self.index.clone(),
            self.board.clone(),
            alert_tx,
            self.counters.clone(),
        )?;

        let state = Arc::new(StoreState {
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: std::time::Instant::now(),
            ingester: Ingester::new(
                self.config.ingest.clone(),
                self.index.clone(),
                self.relations.clone(),
                self.counters.clone(),
            ),
            index: self.index.clone(),
            relations: self.relations.clone(),
            board: self.board.clone(),
            counters: self.counters.clone(),
            query: self.config.query.clone(),
        });

        let evaluator_handle = tokio::spawn(evaluator.run(cancel.clone()));
        let sink_handle = tokio::spawn(log_alerts(alert_rx));

        let served = serve(listener, state, cancel.clone()).await;
        // The server can also stop on its own error; take the evaluator down with it
        cancel.cancel();

        evaluator_handle.await?;
        sink_handle.await?;
        served?;

        info!(counters = ?self.counters.snapshot(), "Store stopped");
        Ok(())
    }
}

async fn log_alerts(mut rx: mpsc::Receiver<Alert>) {
    while let Some(alert) = rx.recv().await {
        warn!(
            alert = %alert.rule,
            labels = %alert.labels,
            value = alert.value,
            "Alert firing"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{AlertRuleConfig, AlertingConfig, ConditionConfig, IngestConfig, QueryConfig};
    use std::time::Duration;

    fn config(rules: Vec<AlertRuleConfig>) -> StoreConfig {
        StoreConfig {
            listen: "127.0.0.1:0".to_string(),
            ingest: IngestConfig::default(),
            query: QueryConfig::default(),
            relations: Vec::new(),
            alerting: AlertingConfig {
                interval: Duration::from_millis(20),
                channel_capacity: 16,
                rules,
            },
        }
    }

    #[tokio::test]
    async fn test_invalid_rule_fails_startup() {
        let runner = StoreRunner::new(config(vec![AlertRuleConfig {
            alert: "Broken".to_string(),
            selector: "{".to_string(),
            condition: ConditionConfig::CountOverTime {
                window: Duration::from_secs(60),
                threshold: 0.0,
            },
            labels: Default::default(),
            annotations: Default::default(),
            require_labels: Vec::new(),
        }]));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let result = runner.run_with_listener(listener, CancellationToken::new()).await;
        assert!(matches!(result, Err(StoreError::AlertRule(_))));
    }

    #[tokio::test]
    async fn test_stops_on_cancel() {
        let runner = StoreRunner::new(config(Vec::new()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(runner.run_with_listener(listener, cancel.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_bind_conflict_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut cfg = config(Vec::new());
        cfg.listen = taken.local_addr().unwrap().to_string();

        let result = StoreRunner::new(cfg).run(CancellationToken::new()).await;
        assert!(matches!(result, Err(StoreError::Bind { .. })));
    }
}
