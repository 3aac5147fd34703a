use service_core::axum::{extract::State, http::StatusCode, response::IntoResponse};

use crate::AppState;

/// Prometheus exposition of the installed recorder
#[utoipa::path(
    get,
    path = "/metrics",
    responses(
        (status = 200, description = "Prometheus metrics"),
        (status = 404, description = "No metrics recorder installed")
    ),
    tag = "Observability"
)]
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed".to_string()),
    }
}
