use crate::protocol::PUSH_PATH;
use crate::store::api::{
    alerts, delete_relation, label_values, labels, list_relations, push, put_relation, query, ready, status,
    StoreState,
};
use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Routes of the store HTTP API.
pub fn router(state: Arc<StoreState>) -> Router {
    Router::new()
        .route(PUSH_PATH, post(push))
        .route("/loki/api/v1/query_range", get(query))
        .route("/loki/api/v1/query", get(query))
        .route("/loki/api/v1/labels", get(labels))
        .route("/loki/api/v1/label/:name/values", get(label_values))
        .route("/prometheus/api/v1/alerts", get(alerts))
        .route("/api/v1/relations", get(list_relations))
        .route("/api/v1/relations/:application", put(put_relation).delete(delete_relation))
        .route("/store/status", get(status))
        .route("/ready", get(ready))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the store API on `listener` until `cancel` fires.
pub async fn serve(listener: TcpListener, state: Arc<StoreState>, cancel: CancellationToken) -> Result<(), std::io::Error> {
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "Starting store HTTP server");
    }

    axum::serve(listener, router(state))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
}
