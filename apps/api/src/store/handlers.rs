use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::module::Skill;
use crate::models::user_state::UserState;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct EvaluationRequest {
    pub skill: Skill,
    pub score: f64,
}

/// POST /api/v1/users/:user_id/evaluations
pub async fn handle_record_evaluation(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(req): Json<EvaluationRequest>,
) -> Result<Json<UserState>, AppError> {
    if !req.score.is_finite() || !(0.0..=1.0).contains(&req.score) {
        return Err(AppError::Validation(format!(
            "score must be between 0 and 1, got {}",
            req.score
        )));
    }
    let updated = state
        .state_manager
        .record_evaluation(user_id, req.skill, req.score)
        .await?;
    state.metrics.increment("evaluations.recorded");
    Ok(Json(updated))
}

#[derive(Deserialize)]
pub struct GoalsRequest {
    pub target_role: Option<String>,
    pub primary_focus: Option<String>,
}

/// PUT /api/v1/users/:user_id/goals
pub async fn handle_update_goals(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(req): Json<GoalsRequest>,
) -> Result<Json<UserState>, AppError> {
    let updated = state
        .state_manager
        .update_goals(user_id, req.target_role, req.primary_focus)
        .await?;
    Ok(Json(updated))
}

/// GET /api/v1/users/:user_id/state
pub async fn handle_get_user_state(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<UserState>, AppError> {
    Ok(Json(state.state_manager.user_state(user_id).await?))
}
