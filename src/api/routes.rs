//! REST endpoints for message classification.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::{error, info};

use crate::pipeline::classifier::Classifier;
use crate::pipeline::types::TriageRequest;

/// Shared state for triage routes.
#[derive(Clone)]
pub struct TriageRouteState {
    pub classifier: Arc<dyn Classifier>,
}

/// POST /triage-email
///
/// Classifies one message. Responds with the decision JSON, or
/// `{"raw_output": ...}` when nothing structured could be recovered.
/// Backend failures are 502 with `{"error": ...}`.
async fn triage_email(
    State(state): State<TriageRouteState>,
    Json(request): Json<TriageRequest>,
) -> impl IntoResponse {
    let message = request.into_message(format!("api-{}", uuid::Uuid::new_v4()));
    info!(id = %message.message_id, sender = %message.sender, "Classification requested");

    match state.classifier.classify(&message).await {
        Ok(outcome) => (StatusCode::OK, Json(serde_json::to_value(outcome).unwrap_or_default())),
        Err(e) => {
            error!(id = %message.message_id, error = %e, "Classification failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(serde_json::json!({"error": e.to_string()})),
            )
        }
    }
}

/// GET /health
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

/// Build the triage REST routes.
pub fn triage_routes(classifier: Arc<dyn Classifier>) -> Router {
    Router::new()
        .route("/triage-email", post(triage_email))
        .route("/health", get(health))
        .with_state(TriageRouteState { classifier })
}
