use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::decision::Decision;
use crate::models::module::{LearningModule, Skill};

/// Latest score per tracked skill. 1.0 means no weakness observed yet.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkillScores {
    pub api_design: f64,
    pub communication: f64,
    pub data_modeling: f64,
    pub reliability: f64,
    pub scalability: f64,
}

impl Default for SkillScores {
    fn default() -> Self {
        Self {
            api_design: 1.0,
            communication: 1.0,
            data_modeling: 1.0,
            reliability: 1.0,
            scalability: 1.0,
        }
    }
}

impl SkillScores {
    pub fn get(&self, skill: Skill) -> f64 {
        match skill {
            Skill::ApiDesign => self.api_design,
            Skill::Communication => self.communication,
            Skill::DataModeling => self.data_modeling,
            Skill::Reliability => self.reliability,
            Skill::Scalability => self.scalability,
        }
    }

    pub fn set(&mut self, skill: Skill, score: f64) {
        let score = score.clamp(0.0, 1.0);
        match skill {
            Skill::ApiDesign => self.api_design = score,
            Skill::Communication => self.communication = score,
            Skill::DataModeling => self.data_modeling = score,
            Skill::Reliability => self.reliability = score,
            Skill::Scalability => self.scalability = score,
        }
    }

    /// The lowest-scoring skill. Ties go to the alphabetically first key.
    pub fn weakest(&self) -> (Skill, f64) {
        let mut weakest = (Skill::ALL[0], self.get(Skill::ALL[0]));
        for skill in Skill::ALL.into_iter().skip(1) {
            let score = self.get(skill);
            if score < weakest.1 {
                weakest = (skill, score);
            }
        }
        weakest
    }
}

/// Per-user routing state. Owned by the state manager; everything else works
/// on clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserState {
    pub user_id: Uuid,
    pub skills: SkillScores,
    pub target_role: Option<String>,
    pub primary_focus: Option<String>,
    pub last_module: Option<LearningModule>,
    pub last_depth: u32,
    /// Evaluation scores reported so far; zero means cold start.
    pub observation_count: u32,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl UserState {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            skills: SkillScores::default(),
            target_role: None,
            primary_focus: None,
            last_module: None,
            last_depth: 0,
            observation_count: 0,
            last_seen_at: None,
            updated_at: Utc::now(),
        }
    }

    pub fn is_cold_start(&self) -> bool {
        self.observation_count == 0
    }

    /// Module and depth of the last decision, if any.
    pub fn previous_decision(&self) -> Option<(LearningModule, u32)> {
        self.last_module.map(|m| (m, self.last_depth))
    }

    pub fn has_goals(&self) -> bool {
        let filled = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        filled(&self.target_role) || filled(&self.primary_focus)
    }
}

/// One externally reported evaluation score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillObservation {
    pub user_id: Uuid,
    pub skill: Skill,
    pub score: f64,
    pub observed_at: DateTime<Utc>,
}

/// Everything the signal collector reads for one user.
#[derive(Debug, Clone)]
pub struct UserContext {
    pub state: UserState,
    /// Newest first.
    pub observations: Vec<SkillObservation>,
    /// Newest first.
    pub decisions: Vec<Decision>,
}

impl UserContext {
    pub fn cold(user_id: Uuid) -> Self {
        Self {
            state: UserState::new(user_id),
            observations: Vec::new(),
            decisions: Vec::new(),
        }
    }

    /// Scores for `skill`, oldest first, limited to the most recent `limit`.
    pub fn skill_history(&self, skill: Skill, limit: usize) -> Vec<f64> {
        let mut scores: Vec<f64> = self
            .observations
            .iter()
            .filter(|o| o.skill == skill)
            .take(limit)
            .map(|o| o.score)
            .collect();
        scores.reverse();
        scores
    }

    pub fn last_observed(&self, skill: Skill) -> Option<DateTime<Utc>> {
        self.observations
            .iter()
            .filter(|o| o.skill == skill)
            .map(|o| o.observed_at)
            .max()
    }

    pub fn last_routed_to(&self, module: LearningModule) -> Option<DateTime<Utc>> {
        self.decisions
            .iter()
            .filter(|d| d.module == module)
            .map(|d| d.created_at)
            .max()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Storage rows
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, FromRow)]
pub struct UserStateRow {
    pub user_id: Uuid,
    pub api_design: f64,
    pub communication: f64,
    pub data_modeling: f64,
    pub reliability: f64,
    pub scalability: f64,
    pub target_role: Option<String>,
    pub primary_focus: Option<String>,
    pub last_module: Option<String>,
    pub last_depth: i32,
    pub observation_count: i32,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct SkillObservationRow {
    pub user_id: Uuid,
    pub skill: String,
    pub score: f64,
    pub observed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn observation(skill: Skill, score: f64, minutes_ago: i64) -> SkillObservation {
        SkillObservation {
            user_id: Uuid::nil(),
            skill,
            score,
            observed_at: Utc::now() - Duration::minutes(minutes_ago),
        }
    }

    #[test]
    fn test_default_scores_mean_no_weakness() {
        let state = UserState::new(Uuid::new_v4());
        assert!(state.is_cold_start());
        for skill in Skill::ALL {
            assert_eq!(state.skills.get(skill), 1.0);
        }
    }

    #[test]
    fn test_weakest_skill_tie_breaks_alphabetically() {
        let mut scores = SkillScores::default();
        scores.set(Skill::Scalability, 0.3);
        scores.set(Skill::DataModeling, 0.3);
        assert_eq!(scores.weakest(), (Skill::DataModeling, 0.3));
    }

    #[test]
    fn test_set_clamps_scores() {
        let mut scores = SkillScores::default();
        scores.set(Skill::Reliability, 1.7);
        scores.set(Skill::ApiDesign, -0.2);
        assert_eq!(scores.reliability, 1.0);
        assert_eq!(scores.api_design, 0.0);
    }

    #[test]
    fn test_skill_history_is_oldest_first_and_limited() {
        let mut ctx = UserContext::cold(Uuid::nil());
        // newest first, as loaded from the store
        ctx.observations = vec![
            observation(Skill::Scalability, 0.3, 1),
            observation(Skill::Reliability, 0.9, 2),
            observation(Skill::Scalability, 0.5, 3),
            observation(Skill::Scalability, 0.7, 4),
        ];
        assert_eq!(ctx.skill_history(Skill::Scalability, 2), vec![0.5, 0.3]);
        assert_eq!(ctx.skill_history(Skill::Scalability, 10), vec![0.7, 0.5, 0.3]);
        assert!(ctx.last_observed(Skill::ApiDesign).is_none());
    }

    #[test]
    fn test_blank_goals_do_not_count() {
        let mut state = UserState::new(Uuid::nil());
        state.target_role = Some("   ".to_string());
        assert!(!state.has_goals());
        state.primary_focus = Some("scalability".to_string());
        assert!(state.has_goals());
    }
}
