/// Store API tests driven in-process through the router.
///
/// Covers the query guarantees of the store:
/// - Distinct label sets never share entries
/// - In-order pushes come back in order
/// - Zero-match selectors return an empty result
/// - Enrich -> push -> query round trip
/// - Whole-batch rejection
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{Duration, Utc};
use logrelay::config::types::{AgentConfig, FileSourceConfig, IngestConfig, QueryConfig, ReadConfig, TopologyConfig};
use logrelay::enrich::Enricher;
use logrelay::forwarder::Batch;
use logrelay::labels::LabelSet;
use logrelay::metrics::StoreCounters;
use logrelay::protocol::{to_unix_nanos, PushRequest, QueryResponse, StreamValues, PUSH_PATH};
use logrelay::source::{LogRecord, Origin};
use logrelay::store::api::StoreState;
use logrelay::store::relations::RelationRegistry;
use logrelay::store::server::router;
use logrelay::store::{AlertBoard, Ingester, StreamIndex};
use std::path::PathBuf;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

fn store() -> Arc<StoreState> {
    let index = Arc::new(StreamIndex::new());
    let relations = Arc::new(RelationRegistry::default());
    let counters = Arc::new(StoreCounters::default());
    Arc::new(StoreState {
        version: "test".to_string(),
        start_time: std::time::Instant::now(),
        ingester: Ingester::new(IngestConfig::default(), index.clone(), relations.clone(), counters.clone()),
        index,
        relations,
        board: Arc::new(AlertBoard::default()),
        counters,
        query: QueryConfig::default(),
    })
}

fn app(state: &Arc<StoreState>) -> Router {
    router(state.clone())
}

fn labels(pairs: &[(&str, &str)]) -> LabelSet {
    let mut labels: LabelSet = [
        ("juju_application", "tester"),
        ("juju_model", "lma"),
        ("juju_model_uuid", "0123456789abcdef"),
    ]
    .into_iter()
    .collect();
    for (name, value) in pairs {
        labels.insert(*name, value.to_string());
    }
    labels
}

/// Entries one second apart, ending a minute ago.
fn stream(labels: LabelSet, lines: &[&str]) -> StreamValues {
    let base = Utc::now() - Duration::minutes(1) - Duration::seconds(lines.len() as i64);
    StreamValues {
        stream: labels,
        values: lines
            .iter()
            .enumerate()
            .map(|(i, line)| (to_unix_nanos(base + Duration::seconds(i as i64)), line.to_string()))
            .collect(),
    }
}

async fn push(state: &Arc<StoreState>, request: &PushRequest) -> (StatusCode, serde_json::Value) {
    let response = app(state)
        .oneshot(
            Request::post(PUSH_PATH)
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(request).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, body)
}

async fn query(state: &Arc<StoreState>, selector: &str) -> QueryResponse {
    let uri = format!(
        "/loki/api/v1/query_range?query={}&limit=5000",
        urlencode(selector)
    );
    let response = app(state)
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK, "query {} failed", selector);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn urlencode(value: &str) -> String {
    value
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' => (b as char).to_string(),
            _ => format!("%{:02X}", b),
        })
        .collect()
}

fn lines(values: &StreamValues) -> Vec<&str> {
    values.values.iter().map(|(_, line)| line.as_str()).collect()
}

#[tokio::test]
async fn test_file_scenario_query_returns_lines_in_order() {
    let state = store();
    let request = PushRequest {
        streams: vec![stream(labels(&[("app", "tester"), ("job", "file")]), &["a", "b"])],
    };
    assert_eq!(push(&state, &request).await.0, StatusCode::NO_CONTENT);

    let response = query(&state, r#"{job=~".+"}"#).await;
    let file = response
        .data
        .result
        .iter()
        .find(|s| s.stream.get("job") == Some("file"))
        .expect("file stream present");
    assert_eq!(lines(file), vec!["a", "b"]);
}

#[tokio::test]
async fn test_syslog_scenario_keeps_all_four_labels() {
    let state = store();
    let syslog = labels(&[
        ("job", "juju_lma_01234567_tester_syslog"),
        ("facility", "user"),
        ("hostname", "h1"),
        ("severity", "info"),
        ("timeQuality_syncAccuracy", "ok"),
    ]);
    let request = PushRequest {
        streams: vec![stream(syslog, &["hello"])],
    };
    assert_eq!(push(&state, &request).await.0, StatusCode::NO_CONTENT);

    let response = query(&state, r#"{job=~".+syslog"}"#).await;
    assert_eq!(response.data.result.len(), 1);
    let stream_labels = &response.data.result[0].stream;
    for key in ["facility", "hostname", "severity", "timeQuality_syncAccuracy"] {
        assert!(stream_labels.contains(key), "missing {}", key);
    }
}

#[tokio::test]
async fn test_distinct_label_sets_never_share_entries() {
    let state = store();
    let request = PushRequest {
        streams: vec![
            stream(labels(&[("job", "one")]), &["one-1", "one-2"]),
            stream(labels(&[("job", "two")]), &["two-1"]),
            stream(labels(&[("job", "one"), ("filename", "/x")]), &["three-1"]),
        ],
    };
    assert_eq!(push(&state, &request).await.0, StatusCode::NO_CONTENT);

    let response = query(&state, r#"{job="one"}"#).await;
    assert_eq!(response.data.result.len(), 2);
    for result in &response.data.result {
        let expected: Vec<&str> = if result.stream.contains("filename") {
            vec!["three-1"]
        } else {
            vec!["one-1", "one-2"]
        };
        assert_eq!(lines(result), expected);
    }

    let response = query(&state, r#"{job="two"}"#).await;
    assert_eq!(lines(&response.data.result[0]), vec!["two-1"]);
}

#[tokio::test]
async fn test_successive_pushes_keep_order() {
    let state = store();
    let job = labels(&[("job", "ordered")]);
    let base = Utc::now() - Duration::minutes(5);

    for i in 0..20 {
        let request = PushRequest {
            streams: vec![StreamValues {
                stream: job.clone(),
                values: vec![(to_unix_nanos(base + Duration::seconds(i)), format!("line {}", i))],
            }],
        };
        assert_eq!(push(&state, &request).await.0, StatusCode::NO_CONTENT);
    }

    let response = query(&state, r#"{job="ordered"}"#).await;
    let expected: Vec<String> = (0..20).map(|i| format!("line {}", i)).collect();
    assert_eq!(lines(&response.data.result[0]), expected);
}

#[tokio::test]
async fn test_zero_match_selector_is_empty_success() {
    let state = store();
    let response = query(&state, r#"{job="does-not-exist"}"#).await;
    assert_eq!(response.status, "success");
    assert!(response.data.result.is_empty());
}

#[tokio::test]
async fn test_enrich_push_query_round_trip() {
    let path = PathBuf::from("/var/log/tester/app.log");
    let config = AgentConfig {
        listen: "127.0.0.1:0".to_string(),
        endpoint: None,
        topology: TopologyConfig {
            application: "tester".to_string(),
            model: "lma".to_string(),
            model_uuid: "0123456789abcdef".to_string(),
            unit: Some("tester/0".to_string()),
        },
        file_forwarding: true,
        syslog: false,
        files: vec![FileSourceConfig {
            path: path.clone(),
            job: None,
            timestamp: None,
            read: ReadConfig::default(),
        }],
        syslog_receiver: Default::default(),
        forwarder: Default::default(),
        channel_capacity: 16,
        shutdown_timeout: std::time::Duration::from_secs(1),
    };

    let record = LogRecord::new(Utc::now(), b"round trip line\n".to_vec(), Origin::File { path });
    let enriched = Enricher::from_config(&config).enrich(&record).unwrap();
    let exact_selector = enriched.labels.to_string();

    let batch = Batch {
        batch_id: Uuid::new_v4(),
        lane: 0,
        bytes: enriched.line.len(),
        records: vec![enriched],
    };

    let state = store();
    assert_eq!(push(&state, &batch.to_push_request()).await.0, StatusCode::NO_CONTENT);

    let response = query(&state, &exact_selector).await;
    assert_eq!(response.data.result.len(), 1);
    assert_eq!(lines(&response.data.result[0]), vec!["round trip line"]);
}

#[tokio::test]
async fn test_invalid_stream_rejects_whole_batch() {
    let state = store();
    let mut bad = stream(labels(&[("job", "bad")]), &["x"]);
    bad.stream = [("job", "bad")].into_iter().collect();

    let request = PushRequest {
        streams: vec![stream(labels(&[("job", "good")]), &["ok"]), bad],
    };
    let (status, body) = push(&state, &request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("missing required labels"));

    let response = query(&state, r#"{job=~".+"}"#).await;
    assert!(response.data.result.is_empty());
    assert_eq!(state.counters.snapshot().pushes_rejected, 1);
}

#[tokio::test]
async fn test_backward_limit_returns_newest() {
    let state = store();
    let request = PushRequest {
        streams: vec![stream(labels(&[("job", "limited")]), &["1", "2", "3", "4"])],
    };
    push(&state, &request).await;

    let uri = format!(
        "/loki/api/v1/query_range?query={}&limit=2&direction=backward",
        urlencode(r#"{job="limited"}"#)
    );
    let response = app(&state)
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let response: QueryResponse = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(lines(&response.data.result[0]), vec!["4", "3"]);
}
