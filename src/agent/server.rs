use crate::agent::api::{clear_endpoint, set_endpoint, status, AgentState};
use axum::{
    routing::{get, put},
    Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

pub fn router(state: Arc<AgentState>) -> Router {
    Router::new()
        .route("/agent/status", get(status))
        .route("/agent/endpoint", put(set_endpoint).delete(clear_endpoint))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the agent API on `listener` until `cancel` fires.
pub async fn serve(listener: TcpListener, state: Arc<AgentState>, cancel: CancellationToken) -> Result<(), std::io::Error> {
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "Starting agent HTTP server");
    }

    axum::serve(listener, router(state))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::AgentCounters;
    use crate::metrics::incr;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tokio::sync::watch;
    use tower::ServiceExt;

    fn state() -> (Arc<AgentState>, watch::Receiver<Option<String>>) {
        let (tx, rx) = watch::channel(None);
        let state = Arc::new(AgentState {
            version: "test".to_string(),
            start_time: std::time::Instant::now(),
            endpoint: tx,
            counters: Arc::new(AgentCounters::default()),
            files: vec!["/var/log/app.log".to_string()],
            syslog_listen: None,
        });
        (state, rx)
    }

    async fn json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn put_endpoint(url: &str) -> Request<Body> {
        Request::put("/agent/endpoint")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::json!({ "url": url }).to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_status_reports_counters() {
        let (state, _rx) = state();
        incr(&state.counters.records_lost);

        let response = router(state)
            .oneshot(Request::get("/agent/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json(response).await;
        assert_eq!(body["counters"]["records_lost"], 1);
        assert_eq!(body["files"][0], "/var/log/app.log");
        assert!(body["endpoint"].is_null());
    }

    #[tokio::test]
    async fn test_set_and_clear_endpoint() {
        let (state, rx) = state();

        let response = router(state.clone())
            .oneshot(put_endpoint("http://store:3100"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(rx.borrow().as_deref(), Some("http://store:3100"));

        let response = router(state)
            .oneshot(Request::delete("/agent/endpoint").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = json(response).await;
        assert_eq!(body["previous"], "http://store:3100");
        assert!(rx.borrow().is_none());
    }

    #[tokio::test]
    async fn test_rejects_bad_endpoint() {
        let (state, rx) = state();

        let response = router(state.clone()).oneshot(put_endpoint("not a url")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = router(state).oneshot(put_endpoint("ftp://store")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(json(response).await["error"].as_str().unwrap().contains("scheme"));
        assert!(rx.borrow().is_none());
    }
}
