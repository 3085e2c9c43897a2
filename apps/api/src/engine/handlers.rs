use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::signals::SignalVector;
use crate::errors::AppError;
use crate::models::decision::{Decision, ReasoningSource};
use crate::models::module::LearningModule;
use crate::state::AppState;

const DEFAULT_HISTORY_LIMIT: usize = 20;
const MAX_HISTORY_LIMIT: usize = 200;

#[derive(Deserialize)]
pub struct UserIdQuery {
    pub user_id: Uuid,
}

#[derive(Serialize)]
pub struct NextModuleResponse {
    pub decision_id: Uuid,
    pub module: LearningModule,
    pub reason: String,
    pub reasoning_source: ReasoningSource,
    pub depth: u32,
    pub score: f64,
    pub signals: SignalVector,
    pub created_at: DateTime<Utc>,
}

impl From<Decision> for NextModuleResponse {
    fn from(d: Decision) -> Self {
        Self {
            decision_id: d.id,
            module: d.module,
            reason: d.reasoning,
            reasoning_source: d.reasoning_source,
            depth: d.depth,
            score: d.score,
            signals: d.signals,
            created_at: d.created_at,
        }
    }
}

/// GET /api/v1/next-module?user_id=
pub async fn handle_next_module(
    State(state): State<AppState>,
    Query(params): Query<UserIdQuery>,
) -> Result<Json<NextModuleResponse>, AppError> {
    let decision = state.engine.decide(params.user_id).await?;
    Ok(Json(decision.into()))
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub user_id: Uuid,
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct DecisionHistoryResponse {
    pub user_id: Uuid,
    pub decisions: Vec<Decision>,
}

/// GET /api/v1/decision-history?user_id=&limit=
/// Newest first.
pub async fn handle_decision_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<DecisionHistoryResponse>, AppError> {
    let limit = match params.limit {
        Some(0) => return Err(AppError::Validation("limit must be at least 1".to_string())),
        Some(n) => n.min(MAX_HISTORY_LIMIT),
        None => DEFAULT_HISTORY_LIMIT,
    };
    let decisions = state
        .state_manager
        .recent_decisions(params.user_id, limit)
        .await?;
    Ok(Json(DecisionHistoryResponse {
        user_id: params.user_id,
        decisions,
    }))
}
