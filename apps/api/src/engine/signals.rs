//! Signal collection: turns a user's stored context into five normalized
//! signals per scored module.
//!
//! Every signal is computed for the module's owning skill only and lies in
//! [0, 1]. The collector is pure: it never touches storage and takes `now` as
//! an argument, so identical inputs always give identical vectors.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::module::{LearningModule, Skill};
use crate::models::user_state::{UserContext, UserState};

/// Value every signal takes when nothing is known.
pub const NEUTRAL: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Weakness,
    Rate,
    Recency,
    GoalAlignment,
    Pattern,
}

impl SignalKind {
    pub const ALL: [SignalKind; 5] = [
        SignalKind::Weakness,
        SignalKind::Rate,
        SignalKind::Recency,
        SignalKind::GoalAlignment,
        SignalKind::Pattern,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SignalKind::Weakness => "weakness",
            SignalKind::Rate => "rate",
            SignalKind::Recency => "recency",
            SignalKind::GoalAlignment => "goal_alignment",
            SignalKind::Pattern => "pattern",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalVector {
    pub weakness: f64,
    pub rate: f64,
    pub recency: f64,
    pub goal_alignment: f64,
    pub pattern: f64,
}

impl SignalVector {
    pub const NEUTRAL: SignalVector = SignalVector {
        weakness: NEUTRAL,
        rate: NEUTRAL,
        recency: NEUTRAL,
        goal_alignment: NEUTRAL,
        pattern: NEUTRAL,
    };

    pub fn get(&self, kind: SignalKind) -> f64 {
        match kind {
            SignalKind::Weakness => self.weakness,
            SignalKind::Rate => self.rate,
            SignalKind::Recency => self.recency,
            SignalKind::GoalAlignment => self.goal_alignment,
            SignalKind::Pattern => self.pattern,
        }
    }
}

/// Tuning for the individual signals.
#[derive(Debug, Clone)]
pub struct SignalParams {
    /// Observations per skill used for the slope behind `rate`.
    pub rate_window: usize,
    /// How strongly a per-observation slope moves `rate` away from neutral.
    pub rate_gain: f64,
    /// Idle time after which `recency` reaches 0.5.
    pub recency_half_life_hours: f64,
    /// Recent decisions inspected for `pattern`.
    pub pattern_window: usize,
    /// Recurrences at which `pattern` saturates.
    pub pattern_cap: u32,
    /// A skill scoring below this counts as a weakness.
    pub weakness_threshold: f64,
}

impl Default for SignalParams {
    fn default() -> Self {
        Self {
            rate_window: 5,
            rate_gain: 2.5,
            recency_half_life_hours: 72.0,
            pattern_window: 10,
            pattern_cap: 5,
            weakness_threshold: 0.4,
        }
    }
}

/// Signals for every scored module of one user.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleSignals {
    pub cold_start: bool,
    pub weakest_skill: Skill,
    pub by_module: BTreeMap<LearningModule, SignalVector>,
}

impl ModuleSignals {
    /// The vector of the module owning the weakest skill.
    pub fn headline(&self) -> SignalVector {
        self.by_module
            .get(&LearningModule::for_skill(self.weakest_skill))
            .copied()
            .unwrap_or(SignalVector::NEUTRAL)
    }

    pub fn for_module(&self, module: LearningModule) -> SignalVector {
        self.by_module
            .get(&module)
            .copied()
            .unwrap_or(SignalVector::NEUTRAL)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SignalCollector {
    params: SignalParams,
}

impl SignalCollector {
    pub fn new(params: SignalParams) -> Self {
        Self { params }
    }

    pub fn compute_signals(&self, ctx: &UserContext, now: DateTime<Utc>) -> ModuleSignals {
        let (weakest_skill, _) = ctx.state.skills.weakest();

        if ctx.state.is_cold_start() {
            return ModuleSignals {
                cold_start: true,
                weakest_skill,
                by_module: LearningModule::scored()
                    .map(|m| (m, SignalVector::NEUTRAL))
                    .collect(),
            };
        }

        let by_module = LearningModule::scored()
            .filter_map(|module| {
                let skill = module.owning_skill()?;
                Some((module, self.vector_for(ctx, module, skill, now)))
            })
            .collect();

        ModuleSignals {
            cold_start: false,
            weakest_skill,
            by_module,
        }
    }

    fn vector_for(
        &self,
        ctx: &UserContext,
        module: LearningModule,
        skill: Skill,
        now: DateTime<Utc>,
    ) -> SignalVector {
        let p = &self.params;
        let last_practiced = ctx
            .last_observed(skill)
            .or_else(|| ctx.last_routed_to(module));

        SignalVector {
            weakness: weakness_signal(ctx.state.skills.get(skill)),
            rate: rate_signal(&ctx.skill_history(skill, p.rate_window), p.rate_gain),
            recency: recency_signal(last_practiced, now, p.recency_half_life_hours),
            goal_alignment: goal_alignment_signal(skill, &ctx.state),
            pattern: pattern_signal(ctx, module, p),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Individual signals
// ────────────────────────────────────────────────────────────────────────────

pub fn weakness_signal(score: f64) -> f64 {
    (1.0 - score).clamp(0.0, 1.0)
}

/// Least-squares slope of `history` (oldest first) mapped so that declining
/// scores push the signal up. Fewer than two points give the neutral value.
pub fn rate_signal(history: &[f64], gain: f64) -> f64 {
    if history.len() < 2 {
        return NEUTRAL;
    }
    let n = history.len() as f64;
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = history.iter().sum::<f64>() / n;
    let (mut num, mut den) = (0.0, 0.0);
    for (i, y) in history.iter().enumerate() {
        let dx = i as f64 - mean_x;
        num += dx * (y - mean_y);
        den += dx * dx;
    }
    let slope = if den > 0.0 { num / den } else { 0.0 };
    (NEUTRAL - slope * gain).clamp(0.0, 1.0)
}

/// Saturating idle-time signal: 0 right after practice, 0.5 after one
/// half-life, approaching 1 afterwards. Never practiced is 1.0.
pub fn recency_signal(
    last_practiced: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    half_life_hours: f64,
) -> f64 {
    let Some(last) = last_practiced else {
        return 1.0;
    };
    let idle_hours = ((now - last).num_seconds() as f64 / 3600.0).max(0.0);
    if half_life_hours <= 0.0 {
        return 1.0;
    }
    (1.0 - 0.5_f64.powf(idle_hours / half_life_hours)).clamp(0.0, 1.0)
}

pub fn goal_alignment_signal(skill: Skill, state: &UserState) -> f64 {
    if !state.has_goals() {
        return NEUTRAL;
    }
    let focus = words(state.primary_focus.as_deref().unwrap_or_default());
    if skill.focus_aliases().iter().any(|a| contains_phrase(&focus, a)) {
        return 1.0;
    }
    let role = words(state.target_role.as_deref().unwrap_or_default());
    if skill.role_keywords().iter().any(|k| contains_phrase(&role, k)) {
        return 0.75;
    }
    0.25
}

/// How often this module was already chosen while its skill was still below
/// the weakness threshold, within the recent decision window.
pub fn pattern_signal(ctx: &UserContext, module: LearningModule, params: &SignalParams) -> f64 {
    let weakness_floor = 1.0 - params.weakness_threshold;
    let recurrences = ctx
        .decisions
        .iter()
        .take(params.pattern_window)
        .filter(|d| d.module == module && d.signals.weakness > weakness_floor)
        .count();
    let cap = params.pattern_cap.max(1) as f64;
    (recurrences as f64 / cap).min(1.0)
}

/// Lowercased words; any non-alphanumeric character separates words.
fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// True when `phrase` occurs in `haystack` as a run of whole words.
fn contains_phrase(haystack: &[String], phrase: &str) -> bool {
    let needle = words(phrase);
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle.as_slice())
}
