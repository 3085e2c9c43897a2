//! State manager: sole owner of `UserState` writes.
//!
//! Every write for a user happens while holding that user's `UserGuard`. The
//! guard wraps a FIFO async mutex, so concurrent requests for the same user
//! are served (and their decisions appended) in arrival order, while requests
//! for different users never wait on each other.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::decision::Decision;
use crate::models::module::Skill;
use crate::models::user_state::{SkillObservation, UserContext, UserState};
use crate::store::{StateStore, StoreError};

/// Observations loaded per request for the rate and recency signals.
pub const OBSERVATION_WINDOW: usize = 200;

/// Decisions loaded per request. Pattern looks at the newest few; recency
/// falls back to the newest decision for a module, so a module last routed
/// to more than this many decisions ago reads as never practiced.
pub const DECISION_WINDOW: usize = 200;

type LockMap = DashMap<Uuid, Arc<Mutex<()>>>;

/// Proof that the holder owns the serialization lock of one user.
/// Dropping the last guard (with no waiters) removes the user's lock entry.
pub struct UserGuard {
    user_id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<LockMap>,
}

impl UserGuard {
    pub fn user_id(&self) -> Uuid {
        self.user_id
    }
}

impl Drop for UserGuard {
    fn drop(&mut self) {
        // Release first so the guard's own handle is gone. Waiters hold a
        // clone of the lock, keeping the count above one.
        drop(self.guard.take());
        self.locks
            .remove_if(&self.user_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[derive(Clone)]
pub struct StateManager {
    store: Arc<dyn StateStore>,
    locks: Arc<LockMap>,
}

impl StateManager {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Waits for the user's lock. Waiters are served in arrival order.
    pub async fn lock_user(&self, user_id: Uuid) -> UserGuard {
        let lock = self
            .locks
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;
        UserGuard {
            user_id,
            guard: Some(guard),
            locks: Arc::clone(&self.locks),
        }
    }

    /// Loads everything the signal collector needs. Unknown users start cold.
    pub async fn load_context(&self, guard: &UserGuard) -> Result<UserContext, StoreError> {
        let user_id = guard.user_id();
        let state = self
            .store
            .load_user_state(user_id)
            .await?
            .unwrap_or_else(|| UserState::new(user_id));
        let observations = self
            .store
            .recent_observations(user_id, OBSERVATION_WINDOW)
            .await?;
        let decisions = self
            .store
            .recent_decisions(user_id, DECISION_WINDOW)
            .await?;
        Ok(UserContext {
            state,
            observations,
            decisions,
        })
    }

    /// Appends `decision` and moves the user's last module and depth forward.
    pub async fn commit_decision(
        &self,
        guard: &UserGuard,
        current: &UserState,
        decision: &Decision,
    ) -> Result<UserState, StoreError> {
        if guard.user_id() != decision.user_id || current.user_id != decision.user_id {
            return Err(StoreError::Corrupt(format!(
                "decision {} does not belong to locked user {}",
                decision.id,
                guard.user_id()
            )));
        }
        let mut next = current.clone();
        next.last_module = Some(decision.module);
        next.last_depth = decision.depth;
        next.last_seen_at = Some(decision.created_at);
        next.updated_at = Utc::now();

        self.store.commit_decision(&next, decision).await?;
        debug!(
            user_id = %decision.user_id,
            module = %decision.module,
            depth = decision.depth,
            "Decision appended"
        );
        Ok(next)
    }

    /// Applies an externally reported evaluation score.
    pub async fn record_evaluation(
        &self,
        user_id: Uuid,
        skill: Skill,
        score: f64,
    ) -> Result<UserState, StoreError> {
        let guard = self.lock_user(user_id).await;
        let mut state = self
            .store
            .load_user_state(guard.user_id())
            .await?
            .unwrap_or_else(|| UserState::new(user_id));

        let now = Utc::now();
        state.skills.set(skill, score);
        state.observation_count = state.observation_count.saturating_add(1);
        state.last_seen_at = Some(now);
        state.updated_at = now;

        let observation = SkillObservation {
            user_id,
            skill,
            score: state.skills.get(skill),
            observed_at: now,
        };
        self.store.record_observation(&state, &observation).await?;
        info!(%user_id, %skill, score = observation.score, "Evaluation recorded");
        Ok(state)
    }

    pub async fn update_goals(
        &self,
        user_id: Uuid,
        target_role: Option<String>,
        primary_focus: Option<String>,
    ) -> Result<UserState, StoreError> {
        let guard = self.lock_user(user_id).await;
        let mut state = self
            .store
            .load_user_state(guard.user_id())
            .await?
            .unwrap_or_else(|| UserState::new(user_id));
        state.target_role = clean(target_role);
        state.primary_focus = clean(primary_focus);
        state.updated_at = Utc::now();
        self.store.save_user_state(&state).await?;
        Ok(state)
    }

    /// Current state, or a fresh cold-start state for unknown users.
    pub async fn user_state(&self, user_id: Uuid) -> Result<UserState, StoreError> {
        Ok(self
            .store
            .load_user_state(user_id)
            .await?
            .unwrap_or_else(|| UserState::new(user_id)))
    }

    /// Audit trail, newest first.
    pub async fn recent_decisions(&self, user_id: Uuid, limit: usize) -> Result<Vec<Decision>, StoreError> {
        self.store.recent_decisions(user_id, limit).await
    }
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::signals::SignalVector;
    use crate::models::decision::ReasoningSource;
    use crate::models::module::LearningModule;
    use crate::store::memory::InMemoryStateStore;
    use std::time::Duration;

    fn manager() -> StateManager {
        StateManager::new(Arc::new(InMemoryStateStore::new()))
    }

    fn decision_for(user_id: Uuid, module: LearningModule, depth: u32) -> Decision {
        Decision {
            id: Uuid::new_v4(),
            user_id,
            created_at: Utc::now(),
            module,
            signals: SignalVector::NEUTRAL,
            score: 0.5,
            reasoning: "test".to_string(),
            reasoning_source: ReasoningSource::Fallback,
            depth,
        }
    }

    #[tokio::test]
    async fn test_unknown_user_loads_cold() {
        let manager = manager();
        let user_id = Uuid::new_v4();
        let guard = manager.lock_user(user_id).await;
        let ctx = manager.load_context(&guard).await.unwrap();
        assert!(ctx.state.is_cold_start());
        assert!(ctx.decisions.is_empty());
    }

    #[tokio::test]
    async fn test_record_evaluation_updates_state_and_history() {
        let manager = manager();
        let user_id = Uuid::new_v4();
        manager
            .record_evaluation(user_id, Skill::Scalability, 0.3)
            .await
            .unwrap();
        let state = manager
            .record_evaluation(user_id, Skill::Scalability, 1.4)
            .await
            .unwrap();
        assert_eq!(state.skills.scalability, 1.0);
        assert_eq!(state.observation_count, 2);

        let guard = manager.lock_user(user_id).await;
        let ctx = manager.load_context(&guard).await.unwrap();
        assert_eq!(ctx.skill_history(Skill::Scalability, 5), vec![0.3, 1.0]);
    }

    #[tokio::test]
    async fn test_commit_decision_moves_last_module_and_depth() {
        let manager = manager();
        let user_id = Uuid::new_v4();
        let guard = manager.lock_user(user_id).await;
        let ctx = manager.load_context(&guard).await.unwrap();
        let decision = decision_for(user_id, LearningModule::ReliabilityDrills, 1);
        let next = manager
            .commit_decision(&guard, &ctx.state, &decision)
            .await
            .unwrap();
        assert_eq!(next.last_module, Some(LearningModule::ReliabilityDrills));
        assert_eq!(next.last_depth, 1);
        drop(guard);

        let history = manager.recent_decisions(user_id, 10).await.unwrap();
        assert_eq!(history, vec![decision]);
    }

    #[tokio::test]
    async fn test_commit_rejects_foreign_decision() {
        let manager = manager();
        let user_id = Uuid::new_v4();
        let guard = manager.lock_user(user_id).await;
        let ctx = manager.load_context(&guard).await.unwrap();
        let foreign = decision_for(Uuid::new_v4(), LearningModule::Onboarding, 1);
        assert!(manager
            .commit_decision(&guard, &ctx.state, &foreign)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_update_goals_trims_and_clears_blank() {
        let manager = manager();
        let user_id = Uuid::new_v4();
        let state = manager
            .update_goals(
                user_id,
                Some("  Staff Engineer ".to_string()),
                Some("   ".to_string()),
            )
            .await
            .unwrap();
        assert_eq!(state.target_role.as_deref(), Some("Staff Engineer"));
        assert!(state.primary_focus.is_none());
        assert!(state.is_cold_start());
    }

    #[tokio::test]
    async fn test_user_lock_serializes_same_user() {
        let manager = manager();
        let user_id = Uuid::new_v4();
        let first = manager.lock_user(user_id).await;

        let m = manager.clone();
        let waiter = tokio::spawn(async move {
            let _g = m.lock_user(user_id).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        // A different user is not blocked.
        let other = tokio::time::timeout(
            Duration::from_millis(100),
            manager.lock_user(Uuid::new_v4()),
        )
        .await;
        assert!(other.is_ok());

        drop(first);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_context_keeps_decisions_beyond_pattern_window() {
        let manager = manager();
        let user_id = Uuid::new_v4();
        let guard = manager.lock_user(user_id).await;
        let mut state = manager.load_context(&guard).await.unwrap().state;
        let early = decision_for(user_id, LearningModule::DataModelingStudio, 1);
        state = manager.commit_decision(&guard, &state, &early).await.unwrap();
        for depth in 1..=15 {
            let d = decision_for(user_id, LearningModule::ScalabilityLab, depth);
            state = manager.commit_decision(&guard, &state, &d).await.unwrap();
        }

        let ctx = manager.load_context(&guard).await.unwrap();
        assert_eq!(ctx.decisions.len(), 16);
        assert_eq!(
            ctx.last_routed_to(LearningModule::DataModelingStudio),
            Some(early.created_at)
        );
    }

    #[tokio::test]
    async fn test_lock_entries_removed_after_last_guard() {
        let manager = manager();
        for _ in 0..1_000 {
            let _guard = manager.lock_user(Uuid::new_v4()).await;
        }
        assert!(manager.locks.is_empty());

        manager
            .record_evaluation(Uuid::new_v4(), Skill::ApiDesign, 0.5)
            .await
            .unwrap();
        assert!(manager.locks.is_empty());
    }

    #[tokio::test]
    async fn test_lock_entry_survives_while_waiter_queued() {
        let manager = manager();
        let user_id = Uuid::new_v4();
        let first = manager.lock_user(user_id).await;

        let m = manager.clone();
        let waiter = tokio::spawn(async move {
            let _g = m.lock_user(user_id).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        drop(first);
        // The waiter still shares the entry, so it was not removed.
        assert!(manager.locks.contains_key(&user_id) || waiter.is_finished());
        waiter.await.unwrap();
        assert!(manager.locks.is_empty());
    }
}
