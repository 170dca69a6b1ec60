use crate::config::types::{AgentConfig, FileSourceConfig, TopologyConfig};
use crate::labels::LabelSet;
use crate::source::record::{LogRecord, Origin};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const JOB_LABEL: &str = "job";
pub const FILENAME_LABEL: &str = "filename";

/// A record ready for the forwarder: final labels plus the decoded line.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedRecord {
    pub labels: LabelSet,
    pub timestamp: DateTime<Utc>,
    pub line: String,
}

/// Merge static labels with the fields derived from the record's origin.
///
/// Static labels win on name clashes. The line is decoded lossily and loses
/// any trailing line terminator.
pub fn enrich(record: &LogRecord, static_labels: &LabelSet) -> (LabelSet, String) {
    let mut labels = match &record.origin {
        Origin::Syslog { fields, .. } => fields.clone(),
        Origin::File { .. } => LabelSet::new(),
    };
    labels.merge(static_labels);

    let line = String::from_utf8_lossy(&record.raw);
    let line = line.trim_end_matches(['\n', '\r']).to_string();

    (labels, line)
}

/// Labels for a tailed file: topology, job and filename.
pub fn file_labels(topology: &TopologyConfig, source: &FileSourceConfig) -> LabelSet {
    let mut labels = topology.labels();
    labels.insert(
        JOB_LABEL,
        source.job.clone().unwrap_or_else(|| topology.default_job()),
    );
    labels.insert(FILENAME_LABEL, source.path.to_string_lossy());
    labels
}

/// Labels for the syslog receiver: topology and `<default job>_syslog`.
pub fn syslog_labels(topology: &TopologyConfig) -> LabelSet {
    let mut labels = topology.labels();
    labels.insert(JOB_LABEL, format!("{}_syslog", topology.default_job()));
    labels
}

/// Static labels for every configured source, looked up by record origin.
#[derive(Debug, Clone)]
pub struct Enricher {
    files: HashMap<PathBuf, LabelSet>,
    syslog: LabelSet,
}

impl Enricher {
    pub fn from_config(config: &AgentConfig) -> Self {
        let files = config
            .files
            .iter()
            .map(|source| (source.path.clone(), file_labels(&config.topology, source)))
            .collect();

        Self {
            files,
            syslog: syslog_labels(&config.topology),
        }
    }

    pub fn file_labels(&self, path: &Path) -> Option<&LabelSet> {
        self.files.get(path)
    }

    pub fn syslog_labels(&self) -> &LabelSet {
        &self.syslog
    }

    /// None when the record comes from a file that is not configured.
    pub fn enrich(&self, record: &LogRecord) -> Option<EnrichedRecord> {
        let static_labels = match &record.origin {
            Origin::File { path } => self.files.get(path)?,
            Origin::Syslog { .. } => &self.syslog,
        };
        let (labels, line) = enrich(record, static_labels);

        Some(EnrichedRecord {
            labels,
            timestamp: record.timestamp,
            line,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::ReadConfig;
    use crate::labels::{JUJU_APPLICATION, JUJU_MODEL, JUJU_MODEL_UUID};
    use std::net::SocketAddr;

    fn topology() -> TopologyConfig {
        TopologyConfig {
            application: "tester".to_string(),
            model: "lma".to_string(),
            model_uuid: "1234567890abcdef".to_string(),
            unit: None,
        }
    }

    fn file_source(path: &str, job: Option<&str>) -> FileSourceConfig {
        FileSourceConfig {
            path: PathBuf::from(path),
            job: job.map(str::to_string),
            timestamp: None,
            read: ReadConfig::default(),
        }
    }

    fn syslog_record(fields: LabelSet, raw: &[u8]) -> LogRecord {
        let peer: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        LogRecord::new(Utc::now(), raw.to_vec(), Origin::Syslog { peer, fields })
    }

    #[test]
    fn test_file_labels_default_job() {
        let labels = file_labels(&topology(), &file_source("/var/log/app.log", None));

        assert_eq!(labels.get(JUJU_APPLICATION), Some("tester"));
        assert_eq!(labels.get(JUJU_MODEL), Some("lma"));
        assert_eq!(labels.get(JUJU_MODEL_UUID), Some("1234567890abcdef"));
        assert_eq!(labels.get(JOB_LABEL), Some("juju_lma_12345678_tester"));
        assert_eq!(labels.get(FILENAME_LABEL), Some("/var/log/app.log"));
    }

    #[test]
    fn test_file_labels_job_override() {
        let labels = file_labels(&topology(), &file_source("/var/log/app.log", Some("file")));
        assert_eq!(labels.get(JOB_LABEL), Some("file"));
    }

    #[test]
    fn test_syslog_job_suffix() {
        let labels = syslog_labels(&topology());
        assert_eq!(labels.get(JOB_LABEL), Some("juju_lma_12345678_tester_syslog"));
        assert!(labels.get(FILENAME_LABEL).is_none());
    }

    #[test]
    fn test_static_labels_win_over_derived() {
        let fields: LabelSet = [("facility", "user"), ("job", "spoofed")].into_iter().collect();
        let record = syslog_record(fields, b"hello\r\n");

        let (labels, line) = enrich(&record, &syslog_labels(&topology()));

        assert_eq!(labels.get("facility"), Some("user"));
        assert_eq!(labels.get(JOB_LABEL), Some("juju_lma_12345678_tester_syslog"));
        assert_eq!(line, "hello");
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let record = LogRecord::new(
            Utc::now(),
            vec![b'o', b'k', 0xff],
            Origin::File {
                path: PathBuf::from("/x"),
            },
        );
        let (_, line) = enrich(&record, &LabelSet::new());
        assert_eq!(line, "ok\u{fffd}");
    }

    #[test]
    fn test_enrich_is_deterministic() {
        let fields: LabelSet = [("hostname", "h1")].into_iter().collect();
        let record = syslog_record(fields, b"line");
        let statics = syslog_labels(&topology());

        assert_eq!(enrich(&record, &statics), enrich(&record, &statics));
    }

    #[test]
    fn test_enricher_skips_unknown_files() {
        let config: AgentConfig = serde_yaml::from_str(
            r#"
topology: { application: tester, model: lma, model_uuid: "1234567890abcdef" }
files:
  - path: /var/log/app.log
"#,
        )
        .unwrap();
        let enricher = Enricher::from_config(&config);

        let known = LogRecord::new(
            Utc::now(),
            b"a".to_vec(),
            Origin::File {
                path: PathBuf::from("/var/log/app.log"),
            },
        );
        let unknown = LogRecord::new(
            Utc::now(),
            b"a".to_vec(),
            Origin::File {
                path: PathBuf::from("/elsewhere.log"),
            },
        );

        let enriched = enricher.enrich(&known).unwrap();
        assert_eq!(enriched.labels.get(FILENAME_LABEL), Some("/var/log/app.log"));
        assert_eq!(enriched.line, "a");
        assert!(enricher.enrich(&unknown).is_none());
    }
}
