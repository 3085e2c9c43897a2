use axum::{extract::State, Json};

use crate::metrics::MetricsSnapshot;
use crate::state::AppState;

/// GET /api/v1/metrics
pub async fn handle_metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}
