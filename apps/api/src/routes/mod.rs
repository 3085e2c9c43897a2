pub mod health;

use axum::{
    routing::{get, post, put},
    Router,
};

use crate::engine::handlers as engine;
use crate::metrics::handlers as metrics;
use crate::services::handlers as services;
use crate::state::AppState;
use crate::store::handlers as users;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Routing decisions
        .route("/api/v1/next-module", get(engine::handle_next_module))
        .route("/api/v1/decision-history", get(engine::handle_decision_history))
        // Downstream services
        .route(
            "/api/v1/circuit-breaker-status",
            get(services::handle_circuit_breaker_status),
        )
        .route(
            "/api/v1/circuit-breakers/:service/reset",
            post(services::handle_reset_breaker),
        )
        .route("/api/v1/service-health", get(services::handle_service_health))
        .route("/api/v1/modules", get(services::handle_list_modules))
        .route(
            "/api/v1/modules/:module/invoke",
            post(services::handle_invoke_module),
        )
        // User state
        .route(
            "/api/v1/users/:user_id/evaluations",
            post(users::handle_record_evaluation),
        )
        .route("/api/v1/users/:user_id/goals", put(users::handle_update_goals))
        .route("/api/v1/users/:user_id/state", get(users::handle_get_user_state))
        .route("/api/v1/metrics", get(metrics::handle_metrics))
        .with_state(state)
}
