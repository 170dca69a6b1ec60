//! Loki-compatible JSON bodies exchanged between agent and store.

use crate::labels::LabelSet;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const PUSH_PATH: &str = "/loki/api/v1/push";

/// `{"streams":[{"stream":{..},"values":[["<unix ns>","line"],..]}]}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushRequest {
    pub streams: Vec<StreamValues>,
}

/// One stream with its entries; shared by push bodies and query results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamValues {
    pub stream: LabelSet,
    pub values: Vec<(String, String)>,
}

impl PushRequest {
    pub fn entry_count(&self) -> usize {
        self.streams.iter().map(|s| s.values.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub status: String,
    pub data: QueryData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryData {
    #[serde(rename = "resultType")]
    pub result_type: String,
    pub result: Vec<StreamValues>,
}

impl QueryResponse {
    pub fn streams(result: Vec<StreamValues>) -> Self {
        Self {
            status: "success".to_string(),
            data: QueryData {
                result_type: "streams".to_string(),
                result,
            },
        }
    }
}

/// `{"status":"success","data":[..]}` for label listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelsResponse {
    pub status: String,
    pub data: Vec<String>,
}

impl LabelsResponse {
    pub fn new(data: Vec<String>) -> Self {
        Self {
            status: "success".to_string(),
            data,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub fn to_unix_nanos(ts: DateTime<Utc>) -> String {
    let nanos = ts.timestamp() as i128 * 1_000_000_000 + ts.timestamp_subsec_nanos() as i128;
    nanos.to_string()
}

/// Unix nanoseconds or RFC 3339.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
        let nanos: i128 = value.parse().ok()?;
        let secs = i64::try_from(nanos.div_euclid(1_000_000_000)).ok()?;
        let subsec = nanos.rem_euclid(1_000_000_000) as u32;
        return DateTime::from_timestamp(secs, subsec);
    }

    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_nanos_keep_subsecond_precision() {
        let ts = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        assert_eq!(to_unix_nanos(ts), "1700000000123456789");
        assert_eq!(parse_timestamp("1700000000123456789"), Some(ts));
    }

    #[test]
    fn test_parse_rfc3339_and_garbage() {
        let ts = parse_timestamp("2024-01-01T00:00:00+01:00").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2023, 12, 31, 23, 0, 0).unwrap());
        assert_eq!(parse_timestamp("yesterday"), None);
        assert_eq!(parse_timestamp(""), None);
    }

    #[test]
    fn test_push_body_shape() {
        let request = PushRequest {
            streams: vec![StreamValues {
                stream: [("job", "file")].into_iter().collect(),
                values: vec![("1".to_string(), "a".to_string())],
            }],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"streams":[{"stream":{"job":"file"},"values":[["1","a"]]}]})
        );
        assert_eq!(request.entry_count(), 1);
    }

    #[test]
    fn test_query_response_shape() {
        let json = serde_json::to_value(QueryResponse::streams(Vec::new())).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"status":"success","data":{"resultType":"streams","result":[]}})
        );
    }
}
