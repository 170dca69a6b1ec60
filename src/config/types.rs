use crate::labels::{LabelSet, JUJU_APPLICATION, JUJU_MODEL, JUJU_MODEL_UUID, JUJU_UNIT, TOPOLOGY_LABELS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration. Each role runs when its section is present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub agent: Option<AgentConfig>,
    #[serde(default)]
    pub store: Option<StoreConfig>,
}

// ===== Agent =====

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Address of the agent status/control API
    #[serde(default = "default_agent_listen")]
    pub listen: String,

    /// Store base URL; unset until a relation provides it
    #[serde(default)]
    pub endpoint: Option<String>,

    pub topology: TopologyConfig,

    #[serde(default = "default_true")]
    pub file_forwarding: bool,

    #[serde(default)]
    pub syslog: bool,

    #[serde(default)]
    pub files: Vec<FileSourceConfig>,

    #[serde(default)]
    pub syslog_receiver: SyslogConfig,

    #[serde(default)]
    pub forwarder: ForwarderConfig,

    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    #[serde(default = "default_shutdown_timeout", with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

fn default_agent_listen() -> String {
    "127.0.0.1:9080".to_string()
}

fn default_true() -> bool {
    true
}

fn default_channel_capacity() -> usize {
    10_000
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Deployment identity of the workload whose logs are forwarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyConfig {
    pub application: String,
    pub model: String,
    pub model_uuid: String,
    #[serde(default)]
    pub unit: Option<String>,
}

impl TopologyConfig {
    pub fn labels(&self) -> LabelSet {
        let mut labels = LabelSet::new();
        labels.insert(JUJU_APPLICATION, self.application.clone());
        labels.insert(JUJU_MODEL, self.model.clone());
        labels.insert(JUJU_MODEL_UUID, self.model_uuid.clone());
        if let Some(unit) = &self.unit {
            labels.insert(JUJU_UNIT, unit.clone());
        }
        labels
    }

    /// `juju_<model>_<first 8 chars of uuid>_<application>`
    pub fn default_job(&self) -> String {
        let short_uuid: String = self.model_uuid.chars().take(8).collect();
        format!("juju_{}_{}_{}", self.model, short_uuid, self.application)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSourceConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub job: Option<String>,
    #[serde(default)]
    pub timestamp: Option<TimestampConfig>,
    #[serde(default)]
    pub read: ReadConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampConfig {
    pub pattern: String,
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadConfig {
    #[serde(default = "default_read_start")]
    pub start: ReadStart,
    #[serde(default = "default_true")]
    pub follow: bool,
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for ReadConfig {
    fn default() -> Self {
        Self {
            start: default_read_start(),
            follow: true,
            poll_interval: default_poll_interval(),
        }
    }
}

fn default_read_start() -> ReadStart {
    ReadStart::Beginning
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(250)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadStart {
    Beginning,
    End,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyslogConfig {
    #[serde(default = "default_syslog_listen")]
    pub listen: String,
    /// Turn RFC 5424 structured-data params into `<sd-id>_<param>` labels
    #[serde(default = "default_true")]
    pub label_structured_data: bool,
    #[serde(default)]
    pub use_incoming_timestamp: bool,
    #[serde(default = "default_max_datagram_size")]
    pub max_datagram_size: usize,
}

impl Default for SyslogConfig {
    fn default() -> Self {
        Self {
            listen: default_syslog_listen(),
            label_structured_data: true,
            use_incoming_timestamp: false,
            max_datagram_size: default_max_datagram_size(),
        }
    }
}

fn default_syslog_listen() -> String {
    "127.0.0.1:1514".to_string()
}

fn default_max_datagram_size() -> usize {
    64 * 1024
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwarderConfig {
    /// Maximum records per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Maximum line bytes per batch
    #[serde(default = "default_batch_bytes")]
    pub batch_bytes: usize,
    /// Maximum time a record waits before its batch is sent
    #[serde(default = "default_batch_wait", with = "humantime_serde")]
    pub batch_wait: Duration,
    /// Number of concurrent sequential senders
    #[serde(default = "default_lanes")]
    pub lanes: usize,
    /// Finished batches a lane may hold while its sender is busy
    #[serde(default = "default_max_pending_batches")]
    pub max_pending_batches: usize,
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_bytes: default_batch_bytes(),
            batch_wait: default_batch_wait(),
            lanes: default_lanes(),
            max_pending_batches: default_max_pending_batches(),
            timeout: default_request_timeout(),
            retry: RetryConfig::default(),
        }
    }
}

fn default_batch_size() -> usize {
    1000
}

fn default_batch_bytes() -> usize {
    1024 * 1024
}

fn default_batch_wait() -> Duration {
    Duration::from_secs(1)
}

fn default_lanes() -> usize {
    4
}

fn default_max_pending_batches() -> usize {
    16
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// None means attempts are only bounded by `max_total`
    #[serde(default = "default_max_attempts")]
    pub max_attempts: Option<u32>,
    #[serde(default = "default_base_delay", with = "humantime_serde")]
    pub base_delay: Duration,
    #[serde(default = "default_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,
    #[serde(default = "default_max_total", with = "humantime_serde")]
    pub max_total: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            max_total: default_max_total(),
        }
    }
}

fn default_max_attempts() -> Option<u32> {
    Some(10)
}

fn default_base_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_max_total() -> Duration {
    Duration::from_secs(300)
}

// ===== Store =====

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_listen")]
    pub listen: String,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub query: QueryConfig,
    /// Relations known at startup; more can be registered over the API
    #[serde(default)]
    pub relations: Vec<RelationConfig>,
    #[serde(default)]
    pub alerting: AlertingConfig,
}

fn default_store_listen() -> String {
    "0.0.0.0:3100".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_required_labels")]
    pub required_labels: Vec<String>,
    #[serde(default = "default_reject_old_samples_max_age", with = "humantime_serde")]
    pub reject_old_samples_max_age: Duration,
    #[serde(default = "default_creation_grace_period", with = "humantime_serde")]
    pub creation_grace_period: Duration,
    #[serde(default = "default_max_line_size")]
    pub max_line_size: usize,
    /// Reject pushes from applications without a registered relation
    #[serde(default)]
    pub require_relation: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            required_labels: default_required_labels(),
            reject_old_samples_max_age: default_reject_old_samples_max_age(),
            creation_grace_period: default_creation_grace_period(),
            max_line_size: default_max_line_size(),
            require_relation: false,
        }
    }
}

pub fn default_required_labels() -> Vec<String> {
    TOPOLOGY_LABELS.iter().map(|s| s.to_string()).collect()
}

fn default_reject_old_samples_max_age() -> Duration {
    Duration::from_secs(3600)
}

fn default_creation_grace_period() -> Duration {
    Duration::from_secs(600)
}

fn default_max_line_size() -> usize {
    256 * 1024
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    #[serde(default = "default_query_limit")]
    pub default_limit: usize,
    #[serde(default = "default_max_query_limit")]
    pub max_limit: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_limit: default_query_limit(),
            max_limit: default_max_query_limit(),
        }
    }
}

fn default_query_limit() -> usize {
    100
}

fn default_max_query_limit() -> usize {
    5000
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationConfig {
    pub application: String,
    pub model: String,
    pub model_uuid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertingConfig {
    #[serde(default = "default_alert_interval", with = "humantime_serde")]
    pub interval: Duration,
    #[serde(default = "default_alert_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default)]
    pub rules: Vec<AlertRuleConfig>,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            interval: default_alert_interval(),
            channel_capacity: default_alert_channel_capacity(),
            rules: Vec::new(),
        }
    }
}

fn default_alert_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_alert_channel_capacity() -> usize {
    1024
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRuleConfig {
    pub alert: String,
    pub selector: String,
    pub condition: ConditionConfig,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default = "default_required_labels")]
    pub require_labels: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConditionConfig {
    /// Entries within the window strictly above `threshold`
    CountOverTime {
        #[serde(with = "humantime_serde")]
        window: Duration,
        threshold: f64,
    },
    /// Entries per second over the window strictly above `threshold`
    Rate {
        #[serde(with = "humantime_serde")]
        window: Duration,
        threshold: f64,
    },
}
