//! Decision engine: the routing pipeline for one request.
//!
//! Flow: lock user → load context → compute signals → score & select →
//!       explain (optional, guarded, time-bounded) → commit → return.
//!
//! Only a state store failure fails the request. Explanation problems of any
//! kind degrade to the deterministic fallback reason.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::explanation::{ExplanationError, ExplanationRequest, Explainer};
use crate::engine::scoring::{dominant_signal, fallback_reason, select_module, ScoringWeights, Selection};
use crate::engine::signals::{ModuleSignals, SignalCollector, SignalParams};
use crate::errors::AppError;
use crate::metrics::MetricsCollector;
use crate::models::decision::{Decision, ReasoningSource};
use crate::models::user_state::UserContext;
use crate::services::circuit_breaker::CallError;
use crate::services::registry::ServiceRegistry;
use crate::services::LLM_SERVICE;
use crate::store::manager::StateManager;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub weights: ScoringWeights,
    pub signals: SignalParams,
    /// Hard bound on the explanation call.
    pub explanation_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            signals: SignalParams::default(),
            explanation_timeout: Duration::from_secs(3),
        }
    }
}

pub struct DecisionEngine {
    state: StateManager,
    collector: SignalCollector,
    weights: ScoringWeights,
    explainer: Option<Arc<dyn Explainer>>,
    registry: Arc<ServiceRegistry>,
    metrics: MetricsCollector,
    explanation_timeout: Duration,
}

impl DecisionEngine {
    pub fn new(
        state: StateManager,
        config: EngineConfig,
        explainer: Option<Arc<dyn Explainer>>,
        registry: Arc<ServiceRegistry>,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            state,
            collector: SignalCollector::new(config.signals),
            weights: config.weights,
            explainer,
            registry,
            metrics,
            explanation_timeout: config.explanation_timeout,
        }
    }

    /// Pure scoring phase: no I/O.
    pub fn evaluate(&self, ctx: &UserContext, now: DateTime<Utc>) -> (ModuleSignals, Selection) {
        let signals = self.collector.compute_signals(ctx, now);
        let selection = select_module(&signals, &self.weights, ctx.state.previous_decision());
        (signals, selection)
    }

    /// Routes `user_id` to its next module and records the decision.
    pub async fn decide(&self, user_id: Uuid) -> Result<Decision, AppError> {
        let started = Instant::now();
        self.metrics.increment("decision.requests");

        let guard = self.state.lock_user(user_id).await;
        let ctx = self.state.load_context(&guard).await.map_err(|e| {
            self.metrics.increment("decision.state_unavailable");
            AppError::from(e)
        })?;

        let now = Utc::now();
        let (signals, selection) = self.evaluate(&ctx, now);
        if signals.cold_start {
            self.metrics.increment("decision.cold_start");
        }

        let (reasoning, reasoning_source) = self.explain(&selection).await;

        let decision = Decision {
            id: Uuid::new_v4(),
            user_id,
            created_at: now,
            module: selection.module,
            signals: selection.signals,
            score: selection.score,
            reasoning,
            reasoning_source,
            depth: selection.depth,
        };

        self.state
            .commit_decision(&guard, &ctx.state, &decision)
            .await
            .map_err(|e| {
                self.metrics.increment("decision.state_unavailable");
                AppError::from(e)
            })?;
        drop(guard);

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.metrics.increment("decision.total");
        self.metrics
            .increment(&format!("decision.module.{}", decision.module));
        self.metrics.record("decision.latency_ms", elapsed_ms);

        info!(
            %user_id,
            module = %decision.module,
            depth = decision.depth,
            score = decision.score,
            cold_start = signals.cold_start,
            reasoning_source = decision.reasoning_source.as_str(),
            elapsed_ms,
            "Routing decision made"
        );

        Ok(decision)
    }

    /// Explanation phase. Never fails: falls back to a templated reason.
    async fn explain(&self, selection: &Selection) -> (String, ReasoningSource) {
        let fallback = || fallback_reason(selection, &self.weights);

        let Some(explainer) = self.explainer.as_ref() else {
            return (fallback(), ReasoningSource::Fallback);
        };

        let request = ExplanationRequest {
            module: selection.module,
            signals: selection.signals,
            score: selection.score,
            depth: selection.depth,
            dominant: dominant_signal(&selection.signals, &self.weights).0,
        };

        let timeout = self.explanation_timeout;
        let attempt = async {
            match tokio::time::timeout(timeout, explainer.explain(&request)).await {
                Ok(result) => result,
                Err(_) => Err(ExplanationError::Timeout(timeout)),
            }
        };

        let result = match self.registry.breaker(LLM_SERVICE) {
            Some(breaker) => breaker.call(attempt).await.map_err(|e| match e {
                CallError::Rejected(rejected) => ExplanationError::Unavailable(rejected),
                CallError::Failed(inner) => inner,
            }),
            None => attempt.await,
        };

        match result {
            Ok(text) if !text.trim().is_empty() => {
                self.metrics.increment("explanation.llm");
                (text, ReasoningSource::Llm)
            }
            Ok(_) => {
                self.metrics.increment("explanation.fallback");
                (fallback(), ReasoningSource::Fallback)
            }
            Err(e) => {
                if matches!(e, ExplanationError::Timeout(_)) {
                    self.metrics.increment("explanation.timeout");
                }
                warn!(error = %e, module = %selection.module, "Explanation unavailable, using fallback reason");
                self.metrics.increment("explanation.fallback");
                (fallback(), ReasoningSource::Fallback)
            }
        }
    }
}
