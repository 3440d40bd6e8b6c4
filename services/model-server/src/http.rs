//! Service routes merged into the shared admin server.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::{get, post}, Json, Router};
use std::sync::Arc;

use crate::reconcile::ReconcileTrigger;
use crate::state::ServingState;

#[derive(Clone)]
struct AdminState {
    serving: Arc<ServingState>,
    trigger: ReconcileTrigger,
}

pub fn router(serving: Arc<ServingState>, trigger: ReconcileTrigger) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/reconcile", post(reconcile))
        .with_state(AdminState { serving, trigger })
}

async fn status(State(s): State<AdminState>) -> impl IntoResponse {
    Json(s.serving.status())
}

async fn reconcile(State(s): State<AdminState>) -> impl IntoResponse {
    match s.trigger.force_reconcile().await {
        Ok(outcome) => (StatusCode::OK, Json(serde_json::json!(outcome))).into_response(),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, Json(serde_json::json!({"error": e.to_string()}))).into_response(),
    }
}
