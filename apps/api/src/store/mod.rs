//! Persistence of user routing state and the decision audit trail.
//!
//! `StateStore` is the pluggable backend (PostgreSQL in production, in-memory
//! for tests and local runs). `StateManager` wraps it and owns the per-user
//! serialization that keeps decisions in arrival order.

pub mod handlers;
pub mod manager;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::decision::Decision;
use crate::models::user_state::{SkillObservation, UserState};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt stored row: {0}")]
    Corrupt(String),

    #[error("state store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load_user_state(&self, user_id: Uuid) -> Result<Option<UserState>, StoreError>;

    async fn save_user_state(&self, state: &UserState) -> Result<(), StoreError>;

    /// Appends `decision` and stores `state` as one atomic step.
    async fn commit_decision(&self, state: &UserState, decision: &Decision) -> Result<(), StoreError>;

    /// Appends `observation` and stores `state` as one atomic step.
    async fn record_observation(
        &self,
        state: &UserState,
        observation: &SkillObservation,
    ) -> Result<(), StoreError>;

    /// Newest first.
    async fn recent_decisions(&self, user_id: Uuid, limit: usize) -> Result<Vec<Decision>, StoreError>;

    /// Newest first.
    async fn recent_observations(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> Result<Vec<SkillObservation>, StoreError>;
}
