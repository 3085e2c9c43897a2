use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::state::AppState;

/// GET /health
/// Liveness of this process plus a count of downstream services not accepting calls.
pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    let unavailable = state
        .registry
        .snapshot()
        .values()
        .filter(|s| !s.healthy)
        .count();
    Json(json!({
        "status": if unavailable == 0 { "ok" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "service": "skillroute-api",
        "unavailable_services": unavailable
    }))
}
