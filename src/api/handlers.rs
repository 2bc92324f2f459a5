// HTTP handlers for the chat gate
// Thin adapters: validation and status mapping here, everything else in the orchestrator.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive},
        IntoResponse, Response, Sse,
    },
    Json,
};
use futures::{stream, StreamExt};
use std::time::Duration;
use tracing::debug;

use super::types::{ClearUsageResponse, ErrorResponse, HealthResponse, PricingResponse, StreamMeta};
use crate::llm::orchestrator::{
    ChatOutcome, ChatRequest, ChatStream, ChatStreamEvent, RequestOrchestrator,
};

/// Shared state of the HTTP surface
#[derive(Clone)]
pub struct GatewayApiState {
    pub orchestrator: RequestOrchestrator,
}

impl GatewayApiState {
    pub fn new(orchestrator: RequestOrchestrator) -> Self {
        Self { orchestrator }
    }
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now(),
    })
}

/// Chat endpoint - POST /api/ai/chat
pub async fn chat(
    State(state): State<GatewayApiState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, ErrorResponse> {
    let Json(request) =
        payload.map_err(|rejection| ErrorResponse::invalid_request(rejection.body_text()))?;
    request.validate().map_err(ErrorResponse::invalid_request)?;

    let response = match state.orchestrator.handle_chat_request(request).await {
        ChatOutcome::Accepted(reply) => (StatusCode::OK, Json(reply)).into_response(),
        ChatOutcome::Streaming(stream) => stream_response(stream),
        ChatOutcome::Rejected(rejection) => {
            (StatusCode::TOO_MANY_REQUESTS, Json(rejection)).into_response()
        }
        ChatOutcome::Failed(failure) => {
            let status = if failure.bad_request {
                StatusCode::BAD_REQUEST
            } else {
                StatusCode::BAD_GATEWAY
            };
            (status, Json(failure)).into_response()
        }
    };

    Ok(response)
}

/// `meta` first, then one event per orchestrator stream event
fn stream_response(stream: ChatStream) -> Response {
    let meta = Event::default().event("meta").json_data(StreamMeta::from(&stream));

    let events = stream.events.map(|event| {
        let name = match &event {
            ChatStreamEvent::Fragment { .. } => "fragment",
            ChatStreamEvent::Done { .. } => "done",
            ChatStreamEvent::Error { .. } => "error",
        };
        Event::default().event(name).json_data(event)
    });

    Sse::new(stream::once(async move { meta }).chain(events))
        .keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(15))
                .text("keep-alive"),
        )
        .into_response()
}

/// Usage report - GET /api/ai/usage/:user_id
pub async fn get_usage(
    State(state): State<GatewayApiState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    debug!("Usage report requested for {}", user_id);
    Json(state.orchestrator.usage_summary(&user_id))
}

/// Price table - GET /api/ai/pricing
pub async fn get_pricing(State(state): State<GatewayApiState>) -> impl IntoResponse {
    Json(PricingResponse {
        models: state.orchestrator.prices().entries(),
    })
}

/// Administrative reset - POST /api/ai/admin/clear-usage
pub async fn clear_usage(State(state): State<GatewayApiState>) -> impl IntoResponse {
    Json(ClearUsageResponse {
        cleared_users: state.orchestrator.clear_usage(),
    })
}

/// Error handler for invalid routes
pub async fn not_found() -> impl IntoResponse {
    ErrorResponse::not_found()
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        let status = match self.error.error_type.as_str() {
            "invalid_request_error" => StatusCode::BAD_REQUEST,
            "not_found_error" => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(self)).into_response()
    }
}
