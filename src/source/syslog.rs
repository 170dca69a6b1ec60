//! UDP syslog receiver.
//!
//! Datagrams are parsed as RFC 5424 when the version field is present and as
//! RFC 3164 otherwise. Header fields become a label fragment that travels on
//! the record's origin; the message body becomes the line.

use crate::config::types::SyslogConfig;
use crate::labels::{is_valid_label_name, LabelSet};
use crate::metrics::{incr, AgentCounters};
use crate::retry::RetryPolicy;
use crate::source::record::{LogRecord, Origin};
use chrono::{DateTime, Datelike, NaiveDateTime, TimeZone, Utc};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const FACILITY_LABEL: &str = "facility";
pub const SEVERITY_LABEL: &str = "severity";
pub const HOSTNAME_LABEL: &str = "hostname";
pub const APP_NAME_LABEL: &str = "app_name";

#[derive(Debug, Error)]
pub enum SyslogError {
    #[error("cannot bind syslog socket on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("syslog socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed syslog message: {0}")]
    Malformed(String),
}

const FACILITIES: [&str; 24] = [
    "kern", "user", "mail", "daemon", "auth", "syslog", "lpr", "news", "uucp", "cron", "authpriv", "ftp", "ntp",
    "security", "console", "solaris-cron", "local0", "local1", "local2", "local3", "local4", "local5", "local6",
    "local7",
];

const SEVERITIES: [&str; 8] = ["emerg", "alert", "crit", "err", "warning", "notice", "info", "debug"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuredElement {
    pub id: String,
    pub params: Vec<(String, String)>,
}

/// A parsed syslog datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyslogMessage {
    pub facility: u8,
    pub severity: u8,
    pub timestamp: Option<DateTime<Utc>>,
    pub hostname: Option<String>,
    pub app_name: Option<String>,
    pub proc_id: Option<String>,
    pub msg_id: Option<String>,
    pub structured_data: Vec<StructuredElement>,
    pub message: String,
}

impl SyslogMessage {
    pub fn facility_name(&self) -> &'static str {
        FACILITIES[self.facility as usize]
    }

    pub fn severity_name(&self) -> &'static str {
        SEVERITIES[self.severity as usize]
    }

    /// Header fields as labels. Structured-data params become
    /// `<sd-id>_<param>` when `structured_data` is set.
    pub fn labels(&self, structured_data: bool) -> LabelSet {
        let mut labels = LabelSet::new();
        labels.insert(FACILITY_LABEL, self.facility_name());
        labels.insert(SEVERITY_LABEL, self.severity_name());
        if let Some(hostname) = &self.hostname {
            labels.insert(HOSTNAME_LABEL, hostname.clone());
        }
        if let Some(app_name) = &self.app_name {
            labels.insert(APP_NAME_LABEL, app_name.clone());
        }

        if structured_data {
            for element in &self.structured_data {
                for (param, value) in &element.params {
                    let name = sanitize_label_name(&format!("{}_{}", element.id, param));
                    labels.insert(name, value.clone());
                }
            }
        }
        labels
    }
}

/// Replace characters that cannot appear in a label name with `_`.
fn sanitize_label_name(raw: &str) -> String {
    let mut name: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if !is_valid_label_name(&name) {
        name.insert(0, '_');
    }
    name
}

pub fn parse(datagram: &[u8]) -> Result<SyslogMessage, SyslogError> {
    let text = String::from_utf8_lossy(datagram);
    let text = text.trim_end_matches(['\n', '\r', '\0']);
    if text.is_empty() {
        return Err(SyslogError::Malformed("empty datagram".to_string()));
    }

    let (pri, rest) = parse_pri(text)?;
    let facility = pri / 8;
    let severity = pri % 8;

    if let Some(after_version) = rest.strip_prefix("1 ") {
        parse_rfc5424(facility, severity, after_version)
    } else {
        Ok(parse_rfc3164(facility, severity, rest, Utc::now()))
    }
}

fn parse_pri(text: &str) -> Result<(u8, &str), SyslogError> {
    let body = text
        .strip_prefix('<')
        .ok_or_else(|| SyslogError::Malformed("missing PRI".to_string()))?;
    let close = body
        .find('>')
        .filter(|&i| (1..=3).contains(&i))
        .ok_or_else(|| SyslogError::Malformed("unterminated PRI".to_string()))?;

    let pri: u16 = body[..close]
        .parse()
        .map_err(|_| SyslogError::Malformed(format!("invalid PRI '{}'", &body[..close])))?;
    if pri > 191 {
        return Err(SyslogError::Malformed(format!("PRI {} out of range", pri)));
    }

    Ok((pri as u8, &body[close + 1..]))
}

fn nil_or(field: &str) -> Option<String> {
    if field == "-" {
        None
    } else {
        Some(field.to_string())
    }
}

fn parse_rfc5424(facility: u8, severity: u8, rest: &str) -> Result<SyslogMessage, SyslogError> {
    let mut fields = rest.splitn(6, ' ');
    let mut next_field = |name: &str| {
        fields
            .next()
            .filter(|f| !f.is_empty())
            .ok_or_else(|| SyslogError::Malformed(format!("missing {}", name)))
    };

    let timestamp_field = next_field("TIMESTAMP")?;
    let hostname = nil_or(next_field("HOSTNAME")?);
    let app_name = nil_or(next_field("APP-NAME")?);
    let proc_id = nil_or(next_field("PROCID")?);
    let msg_id = nil_or(next_field("MSGID")?);
    let remainder = next_field("STRUCTURED-DATA")?;

    let timestamp = if timestamp_field == "-" {
        None
    } else {
        let ts = DateTime::parse_from_rfc3339(timestamp_field)
            .map_err(|e| SyslogError::Malformed(format!("bad timestamp '{}': {}", timestamp_field, e)))?;
        Some(ts.with_timezone(&Utc))
    };

    let (structured_data, message) = parse_structured_data(remainder)?;
    let message = message.strip_prefix('\u{feff}').unwrap_or(message).to_string();

    Ok(SyslogMessage {
        facility,
        severity,
        timestamp,
        hostname,
        app_name,
        proc_id,
        msg_id,
        structured_data,
        message,
    })
}

/// Parses `-` or a run of `[id k="v" ...]` elements; returns them and the message.
fn parse_structured_data(input: &str) -> Result<(Vec<StructuredElement>, &str), SyslogError> {
    if let Some(message) = input.strip_prefix('-') {
        return Ok((Vec::new(), message.strip_prefix(' ').unwrap_or(message)));
    }
    if !input.starts_with('[') {
        return Err(SyslogError::Malformed("invalid STRUCTURED-DATA".to_string()));
    }

    let bytes = input.as_bytes();
    let mut elements = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() && bytes[pos] == b'[' {
        pos += 1;
        let id_end = input[pos..]
            .find([' ', ']'])
            .map(|i| pos + i)
            .ok_or_else(|| SyslogError::Malformed("unterminated SD-ELEMENT".to_string()))?;
        let id = input[pos..id_end].to_string();
        if id.is_empty() {
            return Err(SyslogError::Malformed("empty SD-ID".to_string()));
        }
        pos = id_end;

        let mut params = Vec::new();
        loop {
            match bytes.get(pos) {
                Some(b']') => {
                    pos += 1;
                    break;
                }
                Some(b' ') => pos += 1,
                Some(_) => {
                    let eq = input[pos..]
                        .find('=')
                        .map(|i| pos + i)
                        .ok_or_else(|| SyslogError::Malformed(format!("SD-PARAM without value in [{}]", id)))?;
                    let name = input[pos..eq].to_string();
                    if bytes.get(eq + 1) != Some(&b'"') {
                        return Err(SyslogError::Malformed(format!("unquoted SD-PARAM '{}'", name)));
                    }
                    let (value, consumed) = read_param_value(&input[eq + 2..])?;
                    params.push((name, value));
                    pos = eq + 2 + consumed;
                }
                None => return Err(SyslogError::Malformed(format!("unterminated [{}]", id))),
            }
        }

        elements.push(StructuredElement { id, params });
    }

    let message = &input[pos..];
    Ok((elements, message.strip_prefix(' ').unwrap_or(message)))
}

/// Reads an escaped param value up to its closing quote. Returns the value and
/// the number of bytes consumed including the quote.
fn read_param_value(input: &str) -> Result<(String, usize), SyslogError> {
    let mut value = String::new();
    let mut chars = input.char_indices();

    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Ok((value, i + 1)),
            '\\' => match chars.next() {
                Some((_, escaped @ ('"' | '\\' | ']'))) => value.push(escaped),
                Some((_, other)) => {
                    value.push('\\');
                    value.push(other);
                }
                None => break,
            },
            other => value.push(other),
        }
    }

    Err(SyslogError::Malformed("unterminated SD-PARAM value".to_string()))
}

/// BSD syslog: `Mmm dd hh:mm:ss HOSTNAME TAG: MSG`. Anything that does not
/// fit the header shape is kept whole as the message.
fn parse_rfc3164(facility: u8, severity: u8, rest: &str, now: DateTime<Utc>) -> SyslogMessage {
    let mut message = SyslogMessage {
        facility,
        severity,
        timestamp: None,
        hostname: None,
        app_name: None,
        proc_id: None,
        msg_id: None,
        structured_data: Vec::new(),
        message: rest.to_string(),
    };

    let Some(timestamp) = rest.get(..15).and_then(|ts| parse_bsd_timestamp(ts, now)) else {
        return message;
    };
    message.timestamp = Some(timestamp);

    let after_ts = rest[15..].trim_start();
    let Some((hostname, body)) = after_ts.split_once(' ') else {
        message.message = after_ts.to_string();
        return message;
    };
    message.hostname = Some(hostname.to_string());

    // TAG is the leading run of alphanumerics (plus a few safe chars), then `[pid]:` or `:`
    let tag_end = body
        .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/')))
        .unwrap_or(body.len());
    let (tag, after_tag) = body.split_at(tag_end);

    let after_tag = if let Some(pid_body) = after_tag.strip_prefix('[') {
        match pid_body.split_once(']') {
            Some((pid, tail)) => {
                message.proc_id = Some(pid.to_string());
                tail
            }
            None => after_tag,
        }
    } else {
        after_tag
    };

    match after_tag.strip_prefix(':') {
        Some(msg) if !tag.is_empty() => {
            message.app_name = Some(tag.to_string());
            message.message = msg.strip_prefix(' ').unwrap_or(msg).to_string();
        }
        _ => {
            message.proc_id = None;
            message.message = body.to_string();
        }
    }
    message
}

fn parse_bsd_timestamp(ts: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let mut parts = ts.split_whitespace();
    let (month, day, time) = (parts.next()?, parts.next()?, parts.next()?);
    let parse_in = |year: i32| {
        let candidate = format!("{} {} {:0>2} {}", year, month, day, time);
        NaiveDateTime::parse_from_str(&candidate, "%Y %b %d %H:%M:%S")
            .ok()
            .map(|ndt| Utc.from_utc_datetime(&ndt))
    };

    // No year on the wire; a date far in the future belongs to last year
    let parsed = parse_in(now.year())?;
    if parsed - now > chrono::Duration::days(7) {
        parse_in(now.year() - 1)
    } else {
        Some(parsed)
    }
}

pub async fn bind(addr: &str) -> Result<UdpSocket, SyslogError> {
    UdpSocket::bind(addr).await.map_err(|source| SyslogError::Bind {
        addr: addr.to_string(),
        source,
    })
}

/// Pause schedule after consecutive receive errors.
fn receive_backoff() -> RetryPolicy {
    RetryPolicy::unbounded(Duration::from_millis(10), Duration::from_secs(1))
}

/// Receive datagrams until cancelled or the record channel closes.
pub async fn run_syslog_receiver(
    socket: UdpSocket,
    tx: mpsc::Sender<LogRecord>,
    counters: Arc<AgentCounters>,
    config: SyslogConfig,
    cancel: CancellationToken,
) -> Result<(), SyslogError> {
    let local_addr = socket.local_addr()?;
    info!(addr = %local_addr, "Syslog receiver listening");

    let mut buf = vec![0u8; config.max_datagram_size];
    let backoff = receive_backoff();
    let mut failures = 0u32;

    loop {
        let (len, peer) = tokio::select! {
            _ = cancel.cancelled() => {
                info!(addr = %local_addr, "Syslog receiver stopping");
                return Ok(());
            }
            received = socket.recv_from(&mut buf) => match received {
                Ok(received) => {
                    failures = 0;
                    received
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    incr(&counters.read_errors);
                    let delay = backoff.delay_for(failures);
                    warn!(error = %e, failures, delay_ms = delay.as_millis() as u64, "Syslog receive failed");
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                    continue;
                }
            },
        };

        let Some(record) = to_record(&buf[..len], peer, &config, &counters) else {
            continue;
        };

        if tx.send(record).await.is_err() {
            debug!("Record channel closed, syslog receiver exiting");
            return Ok(());
        }
    }
}

fn to_record(
    datagram: &[u8],
    peer: SocketAddr,
    config: &SyslogConfig,
    counters: &AgentCounters,
) -> Option<LogRecord> {
    let message = match parse(datagram) {
        Ok(message) => message,
        Err(e) => {
            incr(&counters.syslog_dropped);
            debug!(peer = %peer, error = %e, "Dropping syslog datagram");
            return None;
        }
    };
    incr(&counters.syslog_received);

    let timestamp = match message.timestamp {
        Some(ts) if config.use_incoming_timestamp => ts,
        _ => Utc::now(),
    };
    let fields = message.labels(config.label_structured_data);

    Some(LogRecord::new(
        timestamp,
        message.message.into_bytes(),
        Origin::Syslog { peer, fields },
    ))
}
