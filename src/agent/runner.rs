use crate::agent::api::AgentState;
use crate::agent::server::serve;
use crate::config::types::AgentConfig;
use crate::enrich::{EnrichedRecord, Enricher};
use crate::forwarder::{Forwarder, PushClient, PushError, PushTransport};
use crate::metrics::{add, incr, AgentCounters};
use crate::source::record::LogRecord;
use crate::source::syslog::{bind as bind_syslog, run_syslog_receiver, SyslogError};
use crate::source::{FileWatcher, ReaderError};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("file source error: {0}")]
    Reader(#[from] ReaderError),

    #[error("syslog error: {0}")]
    Syslog(#[from] SyslogError),

    #[error("push client error: {0}")]
    Client(#[from] PushError),

    #[error("server error: {0}")]
    Server(#[from] std::io::Error),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Sockets the agent serves on, bound before any task starts.
pub struct AgentSockets {
    pub api: TcpListener,
    pub syslog: Option<UdpSocket>,
}

/// Source Watchers, Label Enricher and Forwarder in one process.
pub struct AgentRunner {
    config: AgentConfig,
    counters: Arc<AgentCounters>,
    endpoint_tx: watch::Sender<Option<String>>,
    transport: Option<Arc<dyn PushTransport>>,
}

impl AgentRunner {
    pub fn new(config: AgentConfig) -> Self {
        let (endpoint_tx, _) = watch::channel(config.endpoint.clone());
        Self {
            config,
            counters: Arc::new(AgentCounters::default()),
            endpoint_tx,
            transport: None,
        }
    }

    /// Push through `transport` instead of the HTTP client.
    pub fn with_transport(mut self, transport: Arc<dyn PushTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn counters(&self) -> Arc<AgentCounters> {
        self.counters.clone()
    }

    /// Bind the API listener and, when enabled, the syslog socket.
    pub async fn bind(&self) -> Result<AgentSockets, AgentError> {
        let api = TcpListener::bind(&self.config.listen)
            .await
            .map_err(|source| AgentError::Bind {
                addr: self.config.listen.clone(),
                source,
            })?;

        let syslog = if self.config.syslog {
            Some(bind_syslog(&self.config.syslog_receiver.listen).await?)
        } else {
            None
        };

        Ok(AgentSockets { api, syslog })
    }

    pub async fn run(self, cancel: CancellationToken) -> Result<(), AgentError> {
        let sockets = self.bind().await?;
        self.run_with_sockets(sockets, cancel).await
    }

    /// Run on already-bound sockets until `cancel` fires, then drain the
    /// pipeline within `shutdown_timeout`.
    pub async fn run_with_sockets(self, sockets: AgentSockets, cancel: CancellationToken) -> Result<(), AgentError> {
        info!(
            application = %self.config.topology.application,
            files = self.config.files.len(),
            syslog = sockets.syslog.is_some(),
            "Starting agent mode"
        );

        // Build every watcher first so a bad timestamp pattern fails startup
        let watchers = if self.config.file_forwarding {
            self.config
                .files
                .iter()
                .map(|source| FileWatcher::new(source, self.counters.clone()))
                .collect::<Result<Vec<_>, _>>()?
        } else {
            Vec::new()
        };

        let transport: Arc<dyn PushTransport> = match &self.transport {
            Some(transport) => transport.clone(),
            None => Arc::new(PushClient::new(
                self.endpoint_tx.subscribe(),
                self.config.forwarder.timeout,
            )?),
        };

        let capacity = self.config.channel_capacity.max(1);
        let (record_tx, record_rx) = mpsc::channel::<LogRecord>(capacity);
        let (enriched_tx, enriched_rx) = mpsc::channel::<EnrichedRecord>(capacity);

        // Sources stop on their own token so the forwarder can outlive them
        let sources_cancel = cancel.child_token();
        let mut source_handles = Vec::new();

        for watcher in watchers {
            source_handles.push(spawn_watcher(watcher, record_tx.clone(), self.counters.clone(), sources_cancel.clone()));
        }

        let syslog_listen = match sockets.syslog {
            Some(socket) => {
                let addr = socket.local_addr().ok().map(|a| a.to_string());
                let tx = record_tx.clone();
                let counters = self.counters.clone();
                let config = self.config.syslog_receiver.clone();
                let token = sources_cancel.clone();
                source_handles.push(tokio::spawn(async move {
                    if let Err(e) = run_syslog_receiver(socket, tx, counters, config, token).await {
                        error!(error = %e, "Syslog receiver failed");
                    }
                }));
                addr
            }
            None => None,
        };
        drop(record_tx);

        let enricher = Enricher::from_config(&self.config);
        let enrich_handle = tokio::spawn(run_enricher(enricher, record_rx, enriched_tx));

        let forwarder = Forwarder::new(self.config.forwarder.clone(), transport, self.counters.clone());
        let mut forwarder_handle = tokio::spawn(forwarder.run(enriched_rx));

        let state = Arc::new(AgentState {
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: std::time::Instant::now(),
            endpoint: self.endpoint_tx.clone(),
            counters: self.counters.clone(),
            files: self
                .config
                .files
                .iter()
                .map(|f| f.path.display().to_string())
                .collect(),
            syslog_listen,
        });
        let served = serve(sockets.api, state, cancel.clone()).await;
        cancel.cancel();

        info!("Agent shutting down, draining forwarder");
        for handle in source_handles {
            handle.await?;
        }
        enrich_handle.await?;

        match tokio::time::timeout(self.config.shutdown_timeout, &mut forwarder_handle).await {
            Ok(joined) => joined?,
            Err(_) => {
                forwarder_handle.abort();
                let abandoned = self.counters.records_in_flight();
                add(&self.counters.records_lost, abandoned);
                warn!(
                    timeout_ms = self.config.shutdown_timeout.as_millis() as u64,
                    records = abandoned,
                    "Forwarder did not drain before shutdown timeout, pending batches are lost"
                );
            }
        }

        served?;
        info!(counters = ?self.counters.snapshot(), "Agent stopped");
        Ok(())
    }
}

fn spawn_watcher(
    mut watcher: FileWatcher,
    tx: mpsc::Sender<LogRecord>,
    counters: Arc<AgentCounters>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(path = %watcher.path().display(), "Watching file");
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                next = watcher.next_record() => next,
            };

            match next {
                Ok(Some(record)) => {
                    if tx.send(record).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    debug!(path = %watcher.path().display(), "File exhausted");
                    break;
                }
                Err(e) => {
                    incr(&counters.read_errors);
                    error!(path = %watcher.path().display(), error = %e, "File watcher stopped");
                    break;
                }
            }
        }
    })
}

async fn run_enricher(enricher: Enricher, mut records: mpsc::Receiver<LogRecord>, out: mpsc::Sender<EnrichedRecord>) {
    while let Some(record) = records.recv().await {
        let Some(enriched) = enricher.enrich(&record) else {
            warn!(origin = ?record.origin, "Record from unconfigured source dropped");
            continue;
        };
        if out.send(enriched).await.is_err() {
            break;
        }
    }
    debug!("Enricher finished");
}
