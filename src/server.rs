use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    error::ServiceError,
    model::{ChatRequest, CompletionResult, InferenceServer, StatusSnapshot},
};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<InferenceServer>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum ServiceStatus {
    Loading,
    Online,
    Offline,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    status: ServiceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl From<StatusSnapshot> for StatusResponse {
    fn from(snapshot: StatusSnapshot) -> Self {
        match snapshot {
            StatusSnapshot::Loading => Self {
                status: ServiceStatus::Loading,
                model: None,
                size_bytes: None,
                error: None,
            },
            StatusSnapshot::Online { model } => Self {
                status: ServiceStatus::Online,
                model: Some(model.name),
                size_bytes: Some(model.size_bytes),
                error: None,
            },
            StatusSnapshot::Offline { error } => Self {
                status: ServiceStatus::Offline,
                model: None,
                size_bytes: None,
                error: Some(error),
            },
        }
    }
}

fn validate(request: &ChatRequest) -> Result<(), ServiceError> {
    if request.max_tokens == Some(0) {
        return Err(ServiceError::BadRequest("max_tokens must be positive".into()));
    }
    if let Some(t) = request.temperature {
        if !t.is_finite() || t < 0.0 {
            return Err(ServiceError::BadRequest(
                "temperature must be a non-negative number".into(),
            ));
        }
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct ChatCompletionResponse {
    object: &'static str,
    model: Option<String>,
    choices: Vec<Choice>,
}

#[derive(Debug, Serialize)]
struct Choice {
    index: usize,
    message: CompletionResult,
}

pub fn build_router(engine: Arc<InferenceServer>) -> Router {
    let state = AppState { engine };

    Router::new()
        .route("/", get(status))
        .route("/health", get(health))
        .route("/v1/chat/completions", post(chat_completions))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn health() -> &'static str {
    "ok"
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(state.engine.status().into())
}

async fn chat_completions(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatCompletionResponse>, ServiceError> {
    validate(&request)?;
    info!(turns = request.messages.len(), "chat completion requested");

    let message = state.engine.complete(request).await?;
    let model = match state.engine.status() {
        StatusSnapshot::Online { model } => Some(model.name),
        _ => None,
    };

    Ok(Json(ChatCompletionResponse {
        object: "chat.completion",
        model,
        choices: vec![Choice { index: 0, message }],
    }))
}
