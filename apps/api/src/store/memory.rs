use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::decision::Decision;
use crate::models::user_state::{SkillObservation, UserState};
use crate::store::{StateStore, StoreError};

#[derive(Default)]
struct UserRecord {
    state: Option<UserState>,
    /// Append order, oldest first.
    decisions: Vec<Decision>,
    observations: Vec<SkillObservation>,
}

/// Process-local store. Used when no database is configured and in tests.
#[derive(Default)]
pub struct InMemoryStateStore {
    users: RwLock<HashMap<Uuid, UserRecord>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn load_user_state(&self, user_id: Uuid) -> Result<Option<UserState>, StoreError> {
        let users = self.users.read().await;
        Ok(users.get(&user_id).and_then(|r| r.state.clone()))
    }

    async fn save_user_state(&self, state: &UserState) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        users.entry(state.user_id).or_default().state = Some(state.clone());
        Ok(())
    }

    async fn commit_decision(&self, state: &UserState, decision: &Decision) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        let record = users.entry(state.user_id).or_default();
        record.decisions.push(decision.clone());
        record.state = Some(state.clone());
        Ok(())
    }

    async fn record_observation(
        &self,
        state: &UserState,
        observation: &SkillObservation,
    ) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        let record = users.entry(state.user_id).or_default();
        record.observations.push(observation.clone());
        record.state = Some(state.clone());
        Ok(())
    }

    async fn recent_decisions(&self, user_id: Uuid, limit: usize) -> Result<Vec<Decision>, StoreError> {
        let users = self.users.read().await;
        Ok(users
            .get(&user_id)
            .map(|r| r.decisions.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn recent_observations(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> Result<Vec<SkillObservation>, StoreError> {
        let users = self.users.read().await;
        Ok(users
            .get(&user_id)
            .map(|r| r.observations.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}
