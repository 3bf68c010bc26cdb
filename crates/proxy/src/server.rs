//! Proxy control HTTP endpoint

use crate::service::ProxyService;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};
use webhost_common::{AgentInfo, Error};

/// Error wrapper that renders as `{"error", "kind", ...}` with the mapped status.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(Error::Validation(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!("{}", self.0);
        } else {
            warn!("{}", self.0);
        }
        (status, Json(self.0.to_body())).into_response()
    }
}

/// Build the sidecar router.
pub fn router(service: Arc<ProxyService>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/proxy/register", post(register))
        .route("/proxy/:key", delete(unregister))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": webhost_common::VERSION,
    }))
}

async fn register(
    State(service): State<Arc<ProxyService>>,
    payload: Result<Json<AgentInfo>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(agent) = payload?;
    let username = agent.username.clone();
    service.register(agent).await?;
    Ok(Json(json!({ "status": "registered", "username": username })))
}

async fn unregister(
    State(service): State<Arc<ProxyService>>,
    Path(key): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    service.unregister(&key).await?;
    Ok(Json(json!({ "status": "removed", "username": key })))
}
