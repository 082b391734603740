//! JSON-over-HTTP endpoint:
//! - GET /health
//! - POST /recall - body is a `RecallRequest`
//! - POST /memories - `{ "userId": ..., "memories": [...] }`

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use memtree_core::{RecallError, RecallRequest, RecallResponse};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::app::{App, NewMemory};

pub fn router(app: App) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/recall", post(recall))
        .route("/memories", post(add_memories))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app)
}

pub async fn serve(app: App, bind: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(app))
        .with_graceful_shutdown(crate::shutdown_signal())
        .await?;
    Ok(())
}

struct ApiError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

impl From<RecallError> for ApiError {
    fn from(e: RecallError) -> Self {
        let status = match &e {
            RecallError::Validation(_) => StatusCode::BAD_REQUEST,
            RecallError::NotFound(_) => StatusCode::NOT_FOUND,
            RecallError::TimedOut => StatusCode::GATEWAY_TIMEOUT,
            RecallError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn recall(
    State(app): State<App>,
    Json(request): Json<RecallRequest>,
) -> Result<Json<RecallResponse>, ApiError> {
    Ok(Json(app.recall(&request).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddBody {
    user_id: String,
    memories: Vec<NewMemory>,
}

async fn add_memories(
    State(app): State<App>,
    Json(body): Json<AddBody>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    if body.user_id.trim().is_empty() {
        return Err(ApiError {
            status: StatusCode::BAD_REQUEST,
            message: "userId is required".into(),
        });
    }
    let ids = app
        .add(&body.user_id, body.memories)
        .await
        .map_err(|e| ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("{e:#}"),
        })?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "added": ids.len(), "ids": ids })),
    ))
}
