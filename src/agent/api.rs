use crate::metrics::{AgentCounters, AgentCountersSnapshot};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Shared state for the agent API
pub struct AgentState {
    pub version: String,
    pub start_time: std::time::Instant,
    pub endpoint: watch::Sender<Option<String>>,
    pub counters: Arc<AgentCounters>,
    pub files: Vec<String>,
    pub syslog_listen: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AgentStatusResponse {
    pub version: String,
    pub uptime_seconds: u64,
    pub endpoint: Option<String>,
    pub files: Vec<String>,
    pub syslog_listen: Option<String>,
    pub counters: AgentCountersSnapshot,
}

#[derive(Debug, Deserialize)]
pub struct EndpointRequest {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct EndpointResponse {
    pub endpoint: Option<String>,
    pub previous: Option<String>,
}

/// GET /agent/status
pub async fn status(State(state): State<Arc<AgentState>>) -> Json<AgentStatusResponse> {
    Json(AgentStatusResponse {
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        endpoint: state.endpoint.borrow().clone(),
        files: state.files.clone(),
        syslog_listen: state.syslog_listen.clone(),
        counters: state.counters.snapshot(),
    })
}

/// PUT /agent/endpoint
pub async fn set_endpoint(
    State(state): State<Arc<AgentState>>,
    Json(request): Json<EndpointRequest>,
) -> Result<Json<EndpointResponse>, ApiError> {
    let url = reqwest::Url::parse(&request.url)
        .map_err(|e| ApiError::BadRequest(format!("invalid endpoint '{}': {}", request.url, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ApiError::BadRequest(format!(
            "endpoint scheme must be http or https, got '{}'",
            url.scheme()
        )));
    }

    let endpoint = Some(request.url);
    let previous = state.endpoint.send_replace(endpoint.clone());
    info!(endpoint = ?endpoint, previous = ?previous, "Store endpoint set");

    Ok(Json(EndpointResponse { endpoint, previous }))
}

/// DELETE /agent/endpoint
pub async fn clear_endpoint(State(state): State<Arc<AgentState>>) -> Json<EndpointResponse> {
    let previous = state.endpoint.send_replace(None);
    info!(previous = ?previous, "Store endpoint cleared, batches will be held and retried");
    Json(EndpointResponse {
        endpoint: None,
        previous,
    })
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
