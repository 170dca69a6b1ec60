use crate::config::types::QueryConfig;
use crate::metrics::{incr, StoreCounters, StoreCountersSnapshot};
use crate::protocol::{parse_timestamp, LabelsResponse, PushRequest, QueryResponse};
use crate::store::alert::{Alert, AlertBoard};
use crate::store::index::{StreamIndex, TimeRange};
use crate::store::ingest::Ingester;
use crate::store::query::{query_limited, Direction};
use crate::store::relations::{Relation, RelationRegistry};
use crate::store::selector::Selector;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Shared state for the store API
pub struct StoreState {
    pub version: String,
    pub start_time: std::time::Instant,
    pub ingester: Ingester,
    pub index: Arc<StreamIndex>,
    pub relations: Arc<RelationRegistry>,
    pub board: Arc<AlertBoard>,
    pub counters: Arc<StoreCounters>,
    pub query: QueryConfig,
}

#[derive(Debug, Deserialize)]
pub struct QueryParams {
    pub query: String,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    /// Instant queries: entries up to and including this time
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub direction: Option<Direction>,
}

#[derive(Debug, Serialize)]
pub struct StoreStatusResponse {
    pub version: String,
    pub uptime_seconds: u64,
    pub streams: usize,
    pub entries: usize,
    pub counters: StoreCountersSnapshot,
    pub relations: BTreeMap<String, Relation>,
}

#[derive(Debug, Serialize)]
pub struct AlertsResponse {
    pub status: String,
    pub data: AlertsData,
}

#[derive(Debug, Serialize)]
pub struct AlertsData {
    pub alerts: Vec<AlertView>,
}

/// Prometheus-style alert entry
#[derive(Debug, Serialize)]
pub struct AlertView {
    pub labels: crate::labels::LabelSet,
    pub annotations: BTreeMap<String, String>,
    pub state: String,
    #[serde(rename = "activeAt")]
    pub active_at: DateTime<Utc>,
    pub value: String,
}

impl From<Alert> for AlertView {
    fn from(alert: Alert) -> Self {
        Self {
            labels: alert.labels,
            annotations: alert.annotations,
            state: "firing".to_string(),
            active_at: alert.fired_at,
            value: alert.value.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RelationResponse {
    pub application: String,
    pub replaced: bool,
}

/// POST /loki/api/v1/push
pub async fn push(State(state): State<Arc<StoreState>>, body: Bytes) -> Result<StatusCode, ApiError> {
    let request: PushRequest =
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(format!("invalid push body: {}", e)))?;

    match state.ingester.push(&request) {
        Ok(ack) => {
            debug!(streams = ack.streams, entries = ack.entries, "Push accepted");
            Ok(StatusCode::NO_CONTENT)
        }
        Err(e) => {
            warn!(error = %e, "Push rejected");
            Err(ApiError::BadRequest(e.to_string()))
        }
    }
}

/// GET /loki/api/v1/query_range and /loki/api/v1/query
pub async fn query(
    State(state): State<Arc<StoreState>>,
    Query(params): Query<QueryParams>,
) -> Result<Json<QueryResponse>, ApiError> {
    let selector = Selector::parse(&params.query).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let start = parse_bound("start", params.start.as_deref())?;
    let end = match (parse_bound("end", params.end.as_deref())?, parse_bound("time", params.time.as_deref())?) {
        (Some(end), _) => Some(end),
        (None, Some(time)) => time.checked_add_signed(chrono::Duration::nanoseconds(1)),
        (None, None) => None,
    };

    let limit = params
        .limit
        .unwrap_or(state.query.default_limit)
        .min(state.query.max_limit);
    let direction = params.direction.unwrap_or_default();

    incr(&state.counters.queries);
    let results = query_limited(&state.index, &selector, &TimeRange::new(start, end), limit, direction);
    debug!(selector = %selector, streams = results.len(), "Query served");

    Ok(Json(QueryResponse::streams(
        results.iter().map(|r| r.to_values()).collect(),
    )))
}

fn parse_bound(name: &str, value: Option<&str>) -> Result<Option<DateTime<Utc>>, ApiError> {
    match value {
        None => Ok(None),
        Some(raw) => parse_timestamp(raw)
            .map(Some)
            .ok_or_else(|| ApiError::BadRequest(format!("invalid {} '{}'", name, raw))),
    }
}

/// GET /loki/api/v1/labels
pub async fn labels(State(state): State<Arc<StoreState>>) -> Json<LabelsResponse> {
    Json(LabelsResponse::new(state.index.label_names()))
}

/// GET /loki/api/v1/label/:name/values
pub async fn label_values(State(state): State<Arc<StoreState>>, Path(name): Path<String>) -> Json<LabelsResponse> {
    Json(LabelsResponse::new(state.index.label_values(&name)))
}

/// GET /prometheus/api/v1/alerts
pub async fn alerts(State(state): State<Arc<StoreState>>) -> Json<AlertsResponse> {
    Json(AlertsResponse {
        status: "success".to_string(),
        data: AlertsData {
            alerts: state.board.alerts().into_iter().map(AlertView::from).collect(),
        },
    })
}

/// GET /ready
pub async fn ready() -> &'static str {
    "ready"
}

/// GET /store/status
pub async fn status(State(state): State<Arc<StoreState>>) -> Json<StoreStatusResponse> {
    Json(StoreStatusResponse {
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        streams: state.index.stream_count(),
        entries: state.index.entry_count(),
        counters: state.counters.snapshot(),
        relations: state.relations.list(),
    })
}

/// GET /api/v1/relations
pub async fn list_relations(State(state): State<Arc<StoreState>>) -> Json<BTreeMap<String, Relation>> {
    Json(state.relations.list())
}

/// PUT /api/v1/relations/:application
pub async fn put_relation(
    State(state): State<Arc<StoreState>>,
    Path(application): Path<String>,
    Json(relation): Json<Relation>,
) -> Result<Json<RelationResponse>, ApiError> {
    if relation.model.is_empty() || relation.model_uuid.is_empty() {
        return Err(ApiError::BadRequest(
            "model and model_uuid cannot be empty".to_string(),
        ));
    }

    info!(application = %application, model = %relation.model, "Relation registered");
    let replaced = state.relations.register(&application, relation).is_some();
    Ok(Json(RelationResponse { application, replaced }))
}

/// DELETE /api/v1/relations/:application
pub async fn delete_relation(
    State(state): State<Arc<StoreState>>,
    Path(application): Path<String>,
) -> Result<StatusCode, ApiError> {
    match state.relations.remove(&application) {
        Some(_) => {
            info!(application = %application, "Relation removed");
            Ok(StatusCode::NO_CONTENT)
        }
        None => Err(ApiError::NotFound(format!("no relation for '{}'", application))),
    }
}

// Error handling
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
