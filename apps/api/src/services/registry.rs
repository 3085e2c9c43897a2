//! Service registry: every known downstream service, its circuit breaker, and
//! the results of its background health probes.
//!
//! Each probed service gets its own monitor task, so a slow or failing
//! service never delays probes of any other. Probe outcomes feed the same
//! breaker that guards real calls; while the breaker refuses calls the probe
//! is skipped too, and in HalfOpen a probe is a trial call.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ServiceConfig;
use crate::metrics::{Histogram, MetricsCollector};
use crate::services::circuit_breaker::{BreakerConfig, BreakerStatus, CircuitBreaker, CircuitState};
use crate::services::probe::{HealthProbe, ProbeError};
use crate::services::LLM_SERVICE;

/// Probe latency samples kept per service for the rolling average.
const HEALTH_SAMPLES: usize = 32;

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub breaker: BreakerConfig,
    pub probe_timeout: Duration,
    /// Appended to a service's base URL to form its probe URL.
    pub health_path: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            breaker: BreakerConfig::default(),
            probe_timeout: Duration::from_secs(2),
            health_path: "/health".to_string(),
        }
    }
}

#[derive(Debug)]
struct HealthRecord {
    last_latency_ms: Option<f64>,
    last_probe_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    samples: Histogram,
}

#[derive(Debug)]
pub struct ServiceEntry {
    name: String,
    base_url: Option<String>,
    health_url: Option<String>,
    breaker: CircuitBreaker,
    health: Mutex<HealthRecord>,
}

impl ServiceEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    pub fn health_url(&self) -> Option<&str> {
        self.health_url.as_deref()
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    fn health(&self) -> MutexGuard<'_, HealthRecord> {
        self.health.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    Healthy { latency_ms: f64 },
    Unhealthy { error: String },
    /// The breaker refused the call; nothing was sent.
    Skipped(CircuitState),
    NoEndpoint,
    UnknownService,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealth {
    pub healthy: bool,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_transition_at: DateTime<Utc>,
    pub probed: bool,
    pub last_probe_at: Option<DateTime<Utc>>,
    pub last_latency_ms: Option<f64>,
    pub avg_latency_ms: Option<f64>,
    pub last_error: Option<String>,
}

pub struct ServiceRegistry {
    services: BTreeMap<String, Arc<ServiceEntry>>,
    metrics: MetricsCollector,
    probe_timeout: Duration,
}

impl ServiceRegistry {
    pub fn new(services: &[ServiceConfig], config: RegistryConfig, metrics: MetricsCollector) -> Self {
        let mut entries = BTreeMap::new();
        let configured = services.iter().map(|s| (s.name.clone(), s.base_url.clone()));
        let llm = std::iter::once((LLM_SERVICE.to_string(), None));

        for (name, base_url) in configured.chain(llm) {
            if entries.contains_key(&name) {
                continue;
            }
            let health_url = base_url
                .as_deref()
                .map(|base| format!("{}{}", base.trim_end_matches('/'), config.health_path));
            let entry = ServiceEntry {
                breaker: CircuitBreaker::new(name.clone(), config.breaker.clone(), metrics.clone()),
                name: name.clone(),
                base_url,
                health_url,
                health: Mutex::new(HealthRecord {
                    last_latency_ms: None,
                    last_probe_at: None,
                    last_error: None,
                    samples: Histogram::new(HEALTH_SAMPLES),
                }),
            };
            entries.insert(name, Arc::new(entry));
        }

        info!(services = entries.len(), "Service registry initialized");
        Self {
            services: entries,
            metrics,
            probe_timeout: config.probe_timeout,
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<ServiceEntry>> {
        self.services.get(name).cloned()
    }

    pub fn breaker(&self, name: &str) -> Option<&CircuitBreaker> {
        self.services.get(name).map(|e| &e.breaker)
    }

    pub fn base_url(&self, name: &str) -> Option<&str> {
        self.services.get(name).and_then(|e| e.base_url())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    /// Runs a single probe of `name` and feeds the result to its breaker.
    pub async fn probe_once(&self, name: &str, probe: &dyn HealthProbe) -> ProbeOutcome {
        let Some(entry) = self.services.get(name) else {
            return ProbeOutcome::UnknownService;
        };
        let Some(url) = entry.health_url.as_deref() else {
            return ProbeOutcome::NoEndpoint;
        };

        let permit = match entry.breaker.try_acquire() {
            Ok(permit) => permit,
            Err(rejected) => {
                debug!(service = name, state = ?rejected.state, "Probe skipped, circuit not accepting calls");
                self.metrics.increment(&format!("probe.{name}.skipped"));
                return ProbeOutcome::Skipped(rejected.state);
            }
        };

        let started = Instant::now();
        let result = match tokio::time::timeout(self.probe_timeout, probe.probe(name, url)).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout(self.probe_timeout)),
        };
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.metrics.record(&format!("probe_latency_ms.{name}"), latency_ms);

        // Breaker first, health record second: never both locks at once.
        match result {
            Ok(()) => {
                permit.success();
                let mut health = entry.health();
                health.last_latency_ms = Some(latency_ms);
                health.last_probe_at = Some(Utc::now());
                health.last_error = None;
                health.samples.record(latency_ms);
                drop(health);
                self.metrics.increment(&format!("probe.{name}.success"));
                ProbeOutcome::Healthy { latency_ms }
            }
            Err(e) => {
                permit.failure();
                let error = e.to_string();
                let mut health = entry.health();
                health.last_latency_ms = Some(latency_ms);
                health.last_probe_at = Some(Utc::now());
                health.last_error = Some(error.clone());
                drop(health);
                self.metrics.increment(&format!("probe.{name}.failure"));
                warn!(service = name, error = %error, latency_ms, "Health probe failed");
                ProbeOutcome::Unhealthy { error }
            }
        }
    }

    pub fn snapshot(&self) -> BTreeMap<String, ServiceHealth> {
        self.services
            .iter()
            .map(|(name, entry)| {
                let status = entry.breaker.status();
                let health = entry.health();
                let view = ServiceHealth {
                    healthy: status.state == CircuitState::Closed,
                    state: status.state,
                    consecutive_failures: status.failure_count,
                    last_transition_at: status.last_transition_at,
                    probed: entry.health_url.is_some(),
                    last_probe_at: health.last_probe_at,
                    last_latency_ms: health.last_latency_ms,
                    avg_latency_ms: health.samples.average(),
                    last_error: health.last_error.clone(),
                };
                (name.clone(), view)
            })
            .collect()
    }

    pub fn breaker_statuses(&self) -> BTreeMap<String, BreakerStatus> {
        self.services
            .iter()
            .map(|(name, entry)| (name.clone(), entry.breaker.status()))
            .collect()
    }

    /// Starts one probe loop per service that has a health endpoint.
    /// The loops stop when `cancel` fires or the handle is shut down.
    pub fn spawn_monitor(
        self: &Arc<Self>,
        probe: Arc<dyn HealthProbe>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> MonitorHandle {
        let mut tasks = Vec::new();
        for entry in self.services.values().filter(|e| e.health_url.is_some()) {
            let registry = Arc::clone(self);
            let probe = Arc::clone(&probe);
            let cancel = cancel.clone();
            let name = entry.name.clone();

            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                debug!(service = %name, ?interval, "Health monitor started");
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {
                            tokio::select! {
                                _ = cancel.cancelled() => break,
                                _ = registry.probe_once(&name, probe.as_ref()) => {}
                            }
                        }
                    }
                }
                debug!(service = %name, "Health monitor stopped");
            }));
        }

        info!(monitored = tasks.len(), ?interval, "Health monitoring started");
        MonitorHandle { cancel, tasks }
    }
}

pub struct MonitorHandle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl MonitorHandle {
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Cancels every probe loop and waits for them to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Health monitor task ended abnormally");
            }
        }
        info!("Health monitoring stopped");
    }
}
