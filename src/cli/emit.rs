//! Synthetic workload: writes numbered lines to a file and/or sends them as
//! RFC 5424 syslog datagrams at a fixed rate.

use chrono::{SecondsFormat, Utc};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum EmitError {
    #[error("io error on '{path}': {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("syslog send to {addr} failed: {source}")]
    Syslog {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("rate must be at least 1 line per second")]
    ZeroRate,

    #[error("rate {0} exceeds {max} lines per second", max = MAX_RATE)]
    RateTooHigh(u32),

    #[error("nothing to emit to: pass --file and/or --syslog")]
    NoTarget,
}

#[derive(Debug, Clone)]
pub struct EmitOptions {
    pub file: Option<PathBuf>,
    pub syslog: Option<String>,
    /// Lines per second
    pub rate: u32,
    /// Stop after this many lines; runs until cancelled otherwise
    pub count: Option<u64>,
    pub app_name: String,
}

/// Highest rate whose tick period is still a whole nanosecond.
pub const MAX_RATE: u32 = 1_000_000_000;

const TIME_QUALITY: &str = r#"[timeQuality tzKnown="1" isSynced="1" syncAccuracy="0"]"#;

/// RFC 5424 line with facility user, severity info and a timeQuality element.
pub fn syslog_line(hostname: &str, app_name: &str, message: &str) -> String {
    format!(
        "<14>1 {} {} {} {} - {} {}",
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        hostname,
        app_name,
        std::process::id(),
        TIME_QUALITY,
        message
    )
}

/// Emit until `count` lines are out or `cancel` fires. Returns lines emitted.
pub async fn emit(options: EmitOptions, cancel: CancellationToken) -> Result<u64, EmitError> {
    if options.rate == 0 {
        return Err(EmitError::ZeroRate);
    }
    if options.rate > MAX_RATE {
        return Err(EmitError::RateTooHigh(options.rate));
    }
    if options.file.is_none() && options.syslog.is_none() {
        return Err(EmitError::NoTarget);
    }

    let mut file = match &options.file {
        Some(path) => Some(
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await
                .map_err(|source| EmitError::File {
                    path: path.clone(),
                    source,
                })?,
        ),
        None => None,
    };

    let socket = match &options.syslog {
        Some(addr) => {
            let socket = UdpSocket::bind("0.0.0.0:0").await.map_err(|source| EmitError::Syslog {
                addr: addr.clone(),
                source,
            })?;
            socket.connect(addr).await.map_err(|source| EmitError::Syslog {
                addr: addr.clone(),
                source,
            })?;
            Some(socket)
        }
        None => None,
    };

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.to_str().map(|s| s.to_string()))
        .unwrap_or_else(|| "localhost".to_string());

    info!(
        rate = options.rate,
        file = ?options.file,
        syslog = ?options.syslog,
        "Emitting synthetic log lines"
    );

    let mut interval = tokio::time::interval(Duration::from_secs(1) / options.rate);
    let mut emitted = 0u64;

    while options.count.map_or(true, |count| emitted < count) {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        let message = format!("{} emit line {}", options.app_name, emitted + 1);

        if let (Some(file), Some(path)) = (file.as_mut(), &options.file) {
            let write = async {
                file.write_all(format!("{}\n", message).as_bytes()).await?;
                file.flush().await
            };
            write.await.map_err(|source| EmitError::File {
                path: path.clone(),
                source,
            })?;
        }

        if let (Some(socket), Some(addr)) = (&socket, &options.syslog) {
            socket
                .send(syslog_line(&hostname, &options.app_name, &message).as_bytes())
                .await
                .map_err(|source| EmitError::Syslog {
                    addr: addr.clone(),
                    source,
                })?;
        }

        emitted += 1;
        debug!(emitted, "Line emitted");
    }

    info!(emitted, "Emitter stopped");
    Ok(emitted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::syslog::parse;

    fn options(file: Option<PathBuf>, syslog: Option<String>, count: u64) -> EmitOptions {
        EmitOptions {
            file,
            syslog,
            rate: 200,
            count: Some(count),
            app_name: "tester".to_string(),
        }
    }

    #[test]
    fn test_syslog_line_parses_back() {
        let line = syslog_line("host-a", "tester", "hello there");
        let message = parse(line.as_bytes()).unwrap();

        assert_eq!(message.facility_name(), "user");
        assert_eq!(message.severity_name(), "info");
        assert_eq!(message.hostname.as_deref(), Some("host-a"));
        assert_eq!(message.app_name.as_deref(), Some("tester"));
        assert_eq!(message.message, "hello there");

        let labels = message.labels(true);
        assert_eq!(labels.get("timeQuality_syncAccuracy"), Some("0"));
        for key in ["facility", "hostname", "severity"] {
            assert!(labels.contains(key), "missing {}", key);
        }
    }

    #[tokio::test]
    async fn test_emits_count_lines_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("emit.log");

        let emitted = emit(options(Some(path.clone()), None, 3), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(emitted, 3);
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            content.lines().collect::<Vec<_>>(),
            vec!["tester emit line 1", "tester emit line 2", "tester emit line 3"]
        );
    }

    #[tokio::test]
    async fn test_emits_datagrams() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = receiver.local_addr().unwrap().to_string();

        let emitted = emit(options(None, Some(addr), 2), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(emitted, 2);

        let mut buf = [0u8; 1024];
        let len = tokio::time::timeout(Duration::from_secs(2), receiver.recv(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(parse(&buf[..len]).unwrap().message, "tester emit line 1");
    }

    #[tokio::test]
    async fn test_requires_target_and_rate() {
        let result = emit(options(None, None, 1), CancellationToken::new()).await;
        assert!(matches!(result, Err(EmitError::NoTarget)));

        let mut zero = options(Some("/tmp/unused".into()), None, 1);
        zero.rate = 0;
        assert!(matches!(emit(zero, CancellationToken::new()).await, Err(EmitError::ZeroRate)));

        let mut fast = options(Some("/tmp/unused".into()), None, 1);
        fast.rate = 2_000_000_000;
        assert!(matches!(
            emit(fast, CancellationToken::new()).await,
            Err(EmitError::RateTooHigh(2_000_000_000))
        ));
    }
}
