use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

use crate::engine::signals::SignalVector;
use crate::models::module::LearningModule;

/// Where a decision's reasoning text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningSource {
    Llm,
    Fallback,
}

impl ReasoningSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningSource::Llm => "llm",
            ReasoningSource::Fallback => "fallback",
        }
    }
}

/// Immutable audit record of one routing choice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub id: Uuid,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub module: LearningModule,
    /// Signals of the chosen module at decision time.
    pub signals: SignalVector,
    pub score: f64,
    pub reasoning: String,
    pub reasoning_source: ReasoningSource,
    /// Consecutive decisions that picked this module, this one included.
    pub depth: u32,
}

#[derive(Debug, Clone, FromRow)]
pub struct DecisionRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub module: String,
    pub signals: Value,
    pub score: f64,
    pub reasoning: String,
    pub reasoning_source: String,
    pub depth: i32,
}
