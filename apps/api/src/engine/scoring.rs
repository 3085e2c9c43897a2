//! Pure module scoring and selection. No I/O, no clock, no randomness.

use serde::{Deserialize, Serialize};

use crate::engine::signals::{ModuleSignals, SignalKind, SignalVector};
use crate::models::module::LearningModule;

/// Scores closer than this are treated as a tie.
const TIE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub weakness: f64,
    pub rate: f64,
    pub recency: f64,
    pub goal_alignment: f64,
    pub pattern: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            weakness: 0.40,
            rate: 0.15,
            recency: 0.15,
            goal_alignment: 0.15,
            pattern: 0.15,
        }
    }
}

impl ScoringWeights {
    pub fn get(&self, kind: SignalKind) -> f64 {
        match kind {
            SignalKind::Weakness => self.weakness,
            SignalKind::Rate => self.rate,
            SignalKind::Recency => self.recency,
            SignalKind::GoalAlignment => self.goal_alignment,
            SignalKind::Pattern => self.pattern,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        for kind in SignalKind::ALL {
            let w = self.get(kind);
            if !w.is_finite() || w < 0.0 {
                return Err(format!("weight for {} must be a non-negative number", kind.name()));
            }
        }
        if SignalKind::ALL.iter().all(|k| self.get(*k) == 0.0) {
            return Err("at least one signal weight must be positive".to_string());
        }
        Ok(())
    }
}

/// score = Σ weight(signal) × signal
pub fn compute_module_score(signals: &SignalVector, weights: &ScoringWeights) -> f64 {
    SignalKind::ALL
        .iter()
        .map(|k| weights.get(*k) * signals.get(*k))
        .sum()
}

/// The signal contributing most to the score; ties go to the earlier kind.
pub fn dominant_signal(signals: &SignalVector, weights: &ScoringWeights) -> (SignalKind, f64) {
    let mut best = SignalKind::Weakness;
    let mut best_contribution = f64::NEG_INFINITY;
    for kind in SignalKind::ALL {
        let contribution = weights.get(kind) * signals.get(kind);
        if contribution > best_contribution + TIE_EPSILON {
            best = kind;
            best_contribution = contribution;
        }
    }
    (best, signals.get(best))
}

/// Depth the module would get if chosen now.
pub fn prospective_depth(module: LearningModule, previous: Option<(LearningModule, u32)>) -> u32 {
    match previous {
        Some((prev, depth)) if prev == module => depth.saturating_add(1),
        _ => 1,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleScore {
    pub module: LearningModule,
    pub score: f64,
    pub depth: u32,
    pub signals: SignalVector,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub module: LearningModule,
    pub score: f64,
    pub depth: u32,
    pub signals: SignalVector,
    pub cold_start: bool,
    /// Every candidate, best first.
    pub ranking: Vec<ModuleScore>,
}

pub fn score_modules(
    signals: &ModuleSignals,
    weights: &ScoringWeights,
    previous: Option<(LearningModule, u32)>,
) -> Vec<ModuleScore> {
    let mut ranking: Vec<ModuleScore> = signals
        .by_module
        .iter()
        .map(|(module, vector)| ModuleScore {
            module: *module,
            score: compute_module_score(vector, weights),
            depth: prospective_depth(*module, previous),
            signals: *vector,
        })
        .collect();
    ranking.sort_by(rank_order);
    ranking
}

/// Highest score first; ties by lowest depth, then module key.
fn rank_order(a: &ModuleScore, b: &ModuleScore) -> std::cmp::Ordering {
    if (a.score - b.score).abs() > TIE_EPSILON {
        return b.score.total_cmp(&a.score);
    }
    a.depth
        .cmp(&b.depth)
        .then_with(|| a.module.key().cmp(b.module.key()))
}

/// Picks the module to route to. Cold-start users always get the default
/// module with neutral signals.
pub fn select_module(
    signals: &ModuleSignals,
    weights: &ScoringWeights,
    previous: Option<(LearningModule, u32)>,
) -> Selection {
    if signals.cold_start {
        let module = LearningModule::DEFAULT;
        let vector = SignalVector::NEUTRAL;
        return Selection {
            module,
            score: compute_module_score(&vector, weights),
            depth: prospective_depth(module, previous),
            signals: vector,
            cold_start: true,
            ranking: Vec::new(),
        };
    }

    let ranking = score_modules(signals, weights, previous);
    match ranking.first() {
        Some(best) => Selection {
            module: best.module,
            score: best.score,
            depth: best.depth,
            signals: best.signals,
            cold_start: false,
            ranking: ranking.clone(),
        },
        None => {
            let module = LearningModule::DEFAULT;
            Selection {
                module,
                score: 0.0,
                depth: prospective_depth(module, previous),
                signals: SignalVector::NEUTRAL,
                cold_start: false,
                ranking,
            }
        }
    }
}

/// Deterministic explanation used whenever the LLM cannot supply one.
pub fn fallback_reason(selection: &Selection, weights: &ScoringWeights) -> String {
    let label = selection.module.label();
    if selection.cold_start {
        return format!(
            "No skill evaluations have been recorded yet, so {label} comes first to establish a baseline."
        );
    }
    let (kind, value) = dominant_signal(&selection.signals, weights);
    let mut reason = format!(
        "{label} was selected because its {} signal is {value:.2}, the largest contributor to a score of {:.2}.",
        kind.name(),
        selection.score
    );
    if selection.depth > 1 {
        reason.push_str(&format!(
            " This is decision {} in a row for this module.",
            selection.depth
        ));
    }
    reason
}
