use std::sync::Arc;

use crate::engine::decision::DecisionEngine;
use crate::metrics::MetricsCollector;
use crate::services::gateway::ModuleGateway;
use crate::services::registry::ServiceRegistry;
use crate::store::manager::StateManager;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<DecisionEngine>,
    pub state_manager: StateManager,
    pub registry: Arc<ServiceRegistry>,
    pub gateway: Arc<ModuleGateway>,
    pub metrics: MetricsCollector,
}
