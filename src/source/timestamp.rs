use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TimestampError {
    #[error("regex compilation failed: {0}")]
    InvalidRegex(#[from] regex::Error),

    #[error("pattern missing 'ts' capture group")]
    MissingTsGroup,

    #[error("failed to parse timestamp '{value}' with format '{format}': {reason}")]
    ParseError {
        value: String,
        format: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimestampFormat {
    Strptime(String),
    Iso8601,
    Epoch,
    EpochMs,
}

impl TimestampFormat {
    /// One of: 'iso8601', 'epoch', 'epoch_ms', or a strptime format string.
    pub fn from_name(name: &str) -> Self {
        match name {
            "iso8601" => TimestampFormat::Iso8601,
            "epoch" => TimestampFormat::Epoch,
            "epoch_ms" => TimestampFormat::EpochMs,
            other => TimestampFormat::Strptime(other.to_string()),
        }
    }

    fn name(&self) -> &str {
        match self {
            TimestampFormat::Strptime(fmt) => fmt,
            TimestampFormat::Iso8601 => "iso8601",
            TimestampFormat::Epoch => "epoch",
            TimestampFormat::EpochMs => "epoch_ms",
        }
    }

    pub fn parse(&self, value: &str) -> Result<DateTime<Utc>, TimestampError> {
        let fail = |reason: String| TimestampError::ParseError {
            value: value.to_string(),
            format: self.name().to_string(),
            reason,
        };

        match self {
            TimestampFormat::Iso8601 => DateTime::parse_from_rfc3339(value)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| fail(e.to_string())),
            TimestampFormat::Epoch => {
                let seconds: i64 = value.parse().map_err(|e: std::num::ParseIntError| fail(e.to_string()))?;
                Utc.timestamp_opt(seconds, 0)
                    .single()
                    .ok_or_else(|| fail("timestamp out of range".to_string()))
            }
            TimestampFormat::EpochMs => {
                let millis: i64 = value.parse().map_err(|e: std::num::ParseIntError| fail(e.to_string()))?;
                Utc.timestamp_millis_opt(millis)
                    .single()
                    .ok_or_else(|| fail("timestamp out of range".to_string()))
            }
            TimestampFormat::Strptime(fmt) => {
                if fmt.contains("%z") || fmt.contains("%Z") || fmt.contains("%:z") {
                    DateTime::parse_from_str(value, fmt)
                        .map(|dt| dt.with_timezone(&Utc))
                        .map_err(|e| fail(e.to_string()))
                } else {
                    // No zone in the format: read as UTC
                    NaiveDateTime::parse_from_str(value, fmt)
                        .map(|ndt| Utc.from_utc_datetime(&ndt))
                        .map_err(|e| fail(e.to_string()))
                }
            }
        }
    }
}

/// Pulls a timestamp out of a log line via a regex with a `ts` capture group.
#[derive(Debug)]
pub struct TimestampExtractor {
    pattern: Regex,
    format: TimestampFormat,
}

impl TimestampExtractor {
    pub fn new(pattern: &str, format: &str) -> Result<Self, TimestampError> {
        let regex = Regex::new(pattern)?;

        if regex.capture_names().all(|name| name != Some("ts")) {
            return Err(TimestampError::MissingTsGroup);
        }

        Ok(Self {
            pattern: regex,
            format: TimestampFormat::from_name(format),
        })
    }

    /// Returns None if the pattern doesn't match the line.
    pub fn extract(&self, line: &str) -> Result<Option<DateTime<Utc>>, TimestampError> {
        let Some(ts) = self.pattern.captures(line).and_then(|caps| caps.name("ts")) else {
            return Ok(None);
        };

        self.format.parse(ts.as_str()).map(Some)
    }
}
