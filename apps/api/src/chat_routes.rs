use axum::{
    extract::{rejection::JsonRejection, Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chat_core::ChatMessageRequest;
use chat_error::{ChatError, Result};
use chat_pipeline::{ChatPipeline, PipelineOutcome};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

/// 降级响应中的错误描述，不区分具体失败原因
const DEGRADED_ERROR: &str = "We couldn't complete your request right now.";

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<ChatPipeline>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseSessionRequest {
    pub tenant_id: Option<String>,
    pub session_id: Option<String>,
}

pub fn create_chat_routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/chat/message", post(post_message))
        .route("/api/v1/chat/session/close", post(close_session))
        .route("/api/v1/health", get(health))
}

async fn post_message(
    State(state): State<AppState>,
    payload: std::result::Result<Json<ChatMessageRequest>, JsonRejection>,
) -> Response {
    let req = match payload {
        Ok(Json(req)) => req,
        Err(rejection) => return bad_body(rejection).into_response(),
    };
    outcome_response(state.pipeline.handle(req).await)
}

async fn close_session(
    State(state): State<AppState>,
    payload: std::result::Result<Json<CloseSessionRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let Json(req) = payload.map_err(bad_body)?;
    let closed = state
        .pipeline
        .close_session(req.tenant_id.as_deref(), req.session_id.as_deref())
        .await?;
    Ok(Json(json!({ "success": true, "closed": closed })))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "rateLimitWindows": state.pipeline.limiter().window_count(),
        "cacheEntries": state.pipeline.cache().len(),
    }))
}

fn bad_body(rejection: JsonRejection) -> ChatError {
    tracing::debug!(error = %rejection, "malformed request body");
    ChatError::InvalidRequest {
        reason: "Malformed request body".to_string(),
    }
}

fn outcome_response(outcome: PipelineOutcome) -> Response {
    match outcome {
        PipelineOutcome::Answered(resp) => (StatusCode::OK, Json(resp)).into_response(),
        PipelineOutcome::Rejected(err) => err.into_response(),
        PipelineOutcome::Degraded { fallback, .. } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "success": false,
                "error": DEGRADED_ERROR,
                "data": { "text": fallback.text, "score": 0 },
            })),
        )
            .into_response(),
    }
}
