use std::collections::BTreeMap;

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::errors::AppError;
use crate::models::module::{LearningModule, Skill};
use crate::services::circuit_breaker::{BreakerStatus, CircuitState};
use crate::services::registry::ServiceHealth;
use crate::state::AppState;

/// GET /api/v1/circuit-breaker-status
pub async fn handle_circuit_breaker_status(
    State(state): State<AppState>,
) -> Json<BTreeMap<String, BreakerStatus>> {
    Json(state.registry.breaker_statuses())
}

/// POST /api/v1/circuit-breakers/:service/reset
pub async fn handle_reset_breaker(
    State(state): State<AppState>,
    Path(service): Path<String>,
) -> Result<Json<BreakerStatus>, AppError> {
    let breaker = state
        .registry
        .breaker(&service)
        .ok_or_else(|| AppError::NotFound(format!("Service '{service}' not found")))?;
    breaker.reset();
    info!(%service, "Circuit breaker reset via API");
    Ok(Json(breaker.status()))
}

/// GET /api/v1/service-health
pub async fn handle_service_health(
    State(state): State<AppState>,
) -> Json<BTreeMap<String, ServiceHealth>> {
    Json(state.registry.snapshot())
}

#[derive(Serialize)]
pub struct ModuleInfo {
    pub module: LearningModule,
    pub label: &'static str,
    pub skill: Option<Skill>,
    /// Backing service state, when the module has a registered service.
    pub service_state: Option<CircuitState>,
}

/// GET /api/v1/modules
pub async fn handle_list_modules(State(state): State<AppState>) -> Json<Vec<ModuleInfo>> {
    let modules = LearningModule::ALL
        .iter()
        .map(|&module| ModuleInfo {
            module,
            label: module.label(),
            skill: module.owning_skill(),
            service_state: state
                .registry
                .breaker(module.service_name())
                .map(|b| b.state()),
        })
        .collect();
    Json(modules)
}

/// POST /api/v1/modules/:module/invoke
pub async fn handle_invoke_module(
    State(state): State<AppState>,
    Path(module): Path<String>,
    Json(payload): Json<Value>,
) -> Result<Json<Value>, AppError> {
    let module: LearningModule = module
        .parse()
        .map_err(|e: crate::models::module::UnknownKey| AppError::NotFound(e.to_string()))?;
    let body = state.gateway.invoke(module, &payload).await?;
    state.metrics.increment(&format!("module.{module}.invoked"));
    Ok(Json(body))
}
