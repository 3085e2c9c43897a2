use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::engine::decision::EngineConfig;
use crate::engine::scoring::ScoringWeights;
use crate::engine::signals::SignalParams;
use crate::metrics::DEFAULT_HISTOGRAM_CAPACITY;
use crate::services::circuit_breaker::BreakerConfig;
use crate::services::registry::RegistryConfig;

/// One downstream service from `SERVICES`.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub name: String,
    /// `None` registers the service without probing it.
    pub base_url: Option<String>,
}

/// Application configuration loaded from environment variables.
/// Every variable has a default; malformed values fail startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Absent ⇒ in-memory state store.
    pub database_url: Option<String>,
    /// Absent ⇒ deterministic fallback reasons only.
    pub anthropic_api_key: Option<String>,
    pub port: u16,
    pub rust_log: String,
    pub services: Vec<ServiceConfig>,
    pub health_path: String,
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
    pub module_timeout: Duration,
    pub explanation_timeout: Duration,
    pub breaker: BreakerConfig,
    pub histogram_capacity: usize,
    pub weights: ScoringWeights,
    pub weakness_threshold: f64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let weights = ScoringWeights {
            weakness: parse_or(&get, "WEIGHT_WEAKNESS", 0.40)?,
            rate: parse_or(&get, "WEIGHT_RATE", 0.15)?,
            recency: parse_or(&get, "WEIGHT_RECENCY", 0.15)?,
            goal_alignment: parse_or(&get, "WEIGHT_GOAL", 0.15)?,
            pattern: parse_or(&get, "WEIGHT_PATTERN", 0.15)?,
        };
        weights
            .validate()
            .map_err(anyhow::Error::msg)
            .context("Invalid scoring weights")?;

        let weakness_threshold: f64 = parse_or(&get, "WEAKNESS_THRESHOLD", 0.4)?;
        if !(0.0..=1.0).contains(&weakness_threshold) {
            bail!("WEAKNESS_THRESHOLD must be between 0 and 1, got {weakness_threshold}");
        }

        let breaker = BreakerConfig {
            failure_threshold: positive(&get, "BREAKER_FAILURE_THRESHOLD", 5)?,
            cooldown: Duration::from_secs(positive(&get, "BREAKER_COOLDOWN_SECS", 30)?),
            half_open_successes: positive(&get, "BREAKER_HALF_OPEN_SUCCESSES", 1)?,
            half_open_max_trials: positive(&get, "BREAKER_HALF_OPEN_MAX_TRIALS", 1)?,
        };

        let health_path = get("HEALTH_PATH").unwrap_or_else(|| "/health".to_string());
        if !health_path.starts_with('/') {
            bail!("HEALTH_PATH must start with '/', got '{health_path}'");
        }

        Ok(Config {
            database_url: get("DATABASE_URL"),
            anthropic_api_key: get("ANTHROPIC_API_KEY"),
            port: parse_or(&get, "PORT", 8080)?,
            rust_log: get("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            services: parse_services(get("SERVICES").as_deref().unwrap_or(""))?,
            health_path,
            probe_interval: Duration::from_secs(positive(&get, "PROBE_INTERVAL_SECS", 15)?),
            probe_timeout: Duration::from_millis(positive(&get, "PROBE_TIMEOUT_MS", 2000)?),
            module_timeout: Duration::from_millis(positive(&get, "MODULE_TIMEOUT_MS", 5000)?),
            explanation_timeout: Duration::from_millis(positive(
                &get,
                "EXPLANATION_TIMEOUT_MS",
                3000,
            )?),
            breaker,
            histogram_capacity: positive(&get, "METRICS_HISTOGRAM_CAPACITY", DEFAULT_HISTOGRAM_CAPACITY)?,
            weights,
            weakness_threshold,
        })
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            weights: self.weights.clone(),
            signals: SignalParams {
                weakness_threshold: self.weakness_threshold,
                ..SignalParams::default()
            },
            explanation_timeout: self.explanation_timeout,
        }
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            breaker: self.breaker.clone(),
            probe_timeout: self.probe_timeout,
            health_path: self.health_path.clone(),
        }
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value '{raw}'")),
        None => Ok(default),
    }
}

fn positive<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr + PartialOrd + Default,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let value = parse_or(get, key, default)?;
    if value <= T::default() {
        bail!("{key} must be greater than zero");
    }
    Ok(value)
}

/// `name=base_url` pairs separated by commas. A bare `name` (or `name=`)
/// registers the service without an endpoint.
fn parse_services(raw: &str) -> Result<Vec<ServiceConfig>> {
    let mut services: Vec<ServiceConfig> = Vec::new();
    for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (name, url) = match item.split_once('=') {
            Some((name, url)) => (name.trim(), url.trim()),
            None => (item, ""),
        };
        if name.is_empty() {
            bail!("SERVICES entry '{item}' has no service name");
        }
        if services.iter().any(|s| s.name == name) {
            bail!("SERVICES lists '{name}' more than once");
        }
        let base_url = if url.is_empty() {
            None
        } else if url.starts_with("http://") || url.starts_with("https://") {
            Some(url.trim_end_matches('/').to_string())
        } else {
            bail!("SERVICES entry '{name}' must use an http(s) URL, got '{url}'");
        };
        services.push(ServiceConfig {
            name: name.to_string(),
            base_url,
        });
    }
    Ok(services)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert!(config.database_url.is_none());
        assert!(config.anthropic_api_key.is_none());
        assert_eq!(config.port, 8080);
        assert_eq!(config.probe_interval, Duration::from_secs(15));
        assert_eq!(config.explanation_timeout, Duration::from_millis(3000));
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.breaker.cooldown, Duration::from_secs(30));
        assert_eq!(config.weights, ScoringWeights::default());
        assert_eq!(config.histogram_capacity, 512);
        assert!(config.services.is_empty());
    }

    #[test]
    fn test_services_parsed() {
        let config = config_from(&[(
            "SERVICES",
            "scalability_lab=http://lab:9000/, llm, reliability_drills=https://drills",
        )])
        .unwrap();
        assert_eq!(
            config.services,
            vec![
                ServiceConfig {
                    name: "scalability_lab".to_string(),
                    base_url: Some("http://lab:9000".to_string()),
                },
                ServiceConfig {
                    name: "llm".to_string(),
                    base_url: None,
                },
                ServiceConfig {
                    name: "reliability_drills".to_string(),
                    base_url: Some("https://drills".to_string()),
                },
            ]
        );
    }

    #[test]
    fn test_invalid_values_fail() {
        assert!(config_from(&[("PORT", "eighty")]).is_err());
        assert!(config_from(&[("BREAKER_FAILURE_THRESHOLD", "0")]).is_err());
        assert!(config_from(&[("WEAKNESS_THRESHOLD", "1.5")]).is_err());
        assert!(config_from(&[("WEIGHT_RATE", "-0.1")]).is_err());
        assert!(config_from(&[("SERVICES", "lab=ftp://lab")]).is_err());
        assert!(config_from(&[("SERVICES", "=http://lab")]).is_err());
        assert!(config_from(&[("SERVICES", "a=http://x,a=http://y")]).is_err());
        assert!(config_from(&[("HEALTH_PATH", "health")]).is_err());
    }

    #[test]
    fn test_threshold_flows_into_engine_config() {
        let config = config_from(&[("WEAKNESS_THRESHOLD", "0.3"), ("WEIGHT_WEAKNESS", "0.7")]).unwrap();
        let engine = config.engine_config();
        assert_eq!(engine.signals.weakness_threshold, 0.3);
        assert_eq!(engine.weights.weakness, 0.7);
    }
}
