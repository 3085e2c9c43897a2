//! PostgreSQL-backed state store.
//!
//! Decisions and observations are append-only: rows are INSERTed, never
//! UPDATEd. Only the `user_states` row is upserted, always in the same
//! transaction as the row that caused the change.

use async_trait::async_trait;
use sqlx::{PgExecutor, PgPool};
use tracing::debug;
use uuid::Uuid;

use crate::engine::signals::SignalVector;
use crate::models::decision::{Decision, DecisionRow, ReasoningSource};
use crate::models::module::{LearningModule, Skill};
use crate::models::user_state::{
    SkillObservation, SkillObservationRow, SkillScores, UserState, UserStateRow,
};
use crate::store::{StateStore, StoreError};

pub struct PgStateStore {
    pool: PgPool,
}

impl PgStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StateStore for PgStateStore {
    async fn load_user_state(&self, user_id: Uuid) -> Result<Option<UserState>, StoreError> {
        let row: Option<UserStateRow> =
            sqlx::query_as("SELECT * FROM user_states WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(state_from_row).transpose()
    }

    async fn save_user_state(&self, state: &UserState) -> Result<(), StoreError> {
        upsert_state(&self.pool, state).await?;
        Ok(())
    }

    async fn commit_decision(&self, state: &UserState, decision: &Decision) -> Result<(), StoreError> {
        let signals = serde_json::to_value(decision.signals)
            .map_err(|e| StoreError::Corrupt(format!("unserializable signals: {e}")))?;

        let mut tx = self.pool.begin().await?;
        upsert_state(&mut *tx, state).await?;
        sqlx::query(
            r#"
            INSERT INTO decisions
                (id, user_id, created_at, module, signals, score, reasoning, reasoning_source, depth)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(decision.id)
        .bind(decision.user_id)
        .bind(decision.created_at)
        .bind(decision.module.key())
        .bind(signals)
        .bind(decision.score)
        .bind(&decision.reasoning)
        .bind(decision.reasoning_source.as_str())
        .bind(to_i32(decision.depth))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        debug!(user_id = %decision.user_id, decision_id = %decision.id, "Decision committed");
        Ok(())
    }

    async fn record_observation(
        &self,
        state: &UserState,
        observation: &SkillObservation,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        upsert_state(&mut *tx, state).await?;
        sqlx::query(
            "INSERT INTO skill_observations (user_id, skill, score, observed_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(observation.user_id)
        .bind(observation.skill.key())
        .bind(observation.score)
        .bind(observation.observed_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn recent_decisions(&self, user_id: Uuid, limit: usize) -> Result<Vec<Decision>, StoreError> {
        let rows: Vec<DecisionRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, created_at, module, signals, score, reasoning, reasoning_source, depth
            FROM decisions
            WHERE user_id = $1
            ORDER BY seq DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(to_limit(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(decision_from_row).collect()
    }

    async fn recent_observations(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> Result<Vec<SkillObservation>, StoreError> {
        let rows: Vec<SkillObservationRow> = sqlx::query_as(
            r#"
            SELECT user_id, skill, score, observed_at
            FROM skill_observations
            WHERE user_id = $1
            ORDER BY seq DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(to_limit(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(observation_from_row).collect()
    }
}

async fn upsert_state<'e, E: PgExecutor<'e>>(executor: E, state: &UserState) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO user_states
            (user_id, api_design, communication, data_modeling, reliability, scalability,
             target_role, primary_focus, last_module, last_depth, observation_count,
             last_seen_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        ON CONFLICT (user_id) DO UPDATE SET
            api_design = EXCLUDED.api_design,
            communication = EXCLUDED.communication,
            data_modeling = EXCLUDED.data_modeling,
            reliability = EXCLUDED.reliability,
            scalability = EXCLUDED.scalability,
            target_role = EXCLUDED.target_role,
            primary_focus = EXCLUDED.primary_focus,
            last_module = EXCLUDED.last_module,
            last_depth = EXCLUDED.last_depth,
            observation_count = EXCLUDED.observation_count,
            last_seen_at = EXCLUDED.last_seen_at,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(state.user_id)
    .bind(state.skills.api_design)
    .bind(state.skills.communication)
    .bind(state.skills.data_modeling)
    .bind(state.skills.reliability)
    .bind(state.skills.scalability)
    .bind(&state.target_role)
    .bind(&state.primary_focus)
    .bind(state.last_module.map(|m| m.key()))
    .bind(to_i32(state.last_depth))
    .bind(to_i32(state.observation_count))
    .bind(state.last_seen_at)
    .bind(state.updated_at)
    .execute(executor)
    .await?;
    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────
// Row conversion: every stored key is validated against the closed enums
// ────────────────────────────────────────────────────────────────────────────

fn state_from_row(row: UserStateRow) -> Result<UserState, StoreError> {
    let last_module = row
        .last_module
        .as_deref()
        .map(str::parse::<LearningModule>)
        .transpose()
        .map_err(|e| StoreError::Corrupt(format!("user_states.last_module: {e}")))?;

    Ok(UserState {
        user_id: row.user_id,
        skills: SkillScores {
            api_design: row.api_design,
            communication: row.communication,
            data_modeling: row.data_modeling,
            reliability: row.reliability,
            scalability: row.scalability,
        },
        target_role: row.target_role,
        primary_focus: row.primary_focus,
        last_module,
        last_depth: from_i32(row.last_depth, "user_states.last_depth")?,
        observation_count: from_i32(row.observation_count, "user_states.observation_count")?,
        last_seen_at: row.last_seen_at,
        updated_at: row.updated_at,
    })
}

fn decision_from_row(row: DecisionRow) -> Result<Decision, StoreError> {
    let module = row
        .module
        .parse::<LearningModule>()
        .map_err(|e| StoreError::Corrupt(format!("decisions.module: {e}")))?;
    let signals: SignalVector = serde_json::from_value(row.signals)
        .map_err(|e| StoreError::Corrupt(format!("decisions.signals: {e}")))?;
    let reasoning_source = match row.reasoning_source.as_str() {
        "llm" => ReasoningSource::Llm,
        "fallback" => ReasoningSource::Fallback,
        other => {
            return Err(StoreError::Corrupt(format!(
                "decisions.reasoning_source: unknown value '{other}'"
            )))
        }
    };

    Ok(Decision {
        id: row.id,
        user_id: row.user_id,
        created_at: row.created_at,
        module,
        signals,
        score: row.score,
        reasoning: row.reasoning,
        reasoning_source,
        depth: from_i32(row.depth, "decisions.depth")?,
    })
}

fn observation_from_row(row: SkillObservationRow) -> Result<SkillObservation, StoreError> {
    let skill = row
        .skill
        .parse::<Skill>()
        .map_err(|e| StoreError::Corrupt(format!("skill_observations.skill: {e}")))?;
    Ok(SkillObservation {
        user_id: row.user_id,
        skill,
        score: row.score,
        observed_at: row.observed_at,
    })
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn to_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn from_i32(value: i32, column: &str) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("{column}: negative value {value}")))
}
