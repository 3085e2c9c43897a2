//! Invokes learning modules on their backing services, always through the
//! service's circuit breaker.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::errors::AppError;
use crate::models::module::LearningModule;
use crate::services::circuit_breaker::CallError;
use crate::services::registry::ServiceRegistry;

/// Failures that count against the service's breaker.
#[derive(Debug, Error)]
enum InvokeError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("status {status}: {body}")]
    Status { status: u16, body: String },
}

/// A 4xx from the module: the request was wrong, the service is fine.
struct ClientRejection {
    status: u16,
    body: String,
}

pub struct ModuleGateway {
    client: reqwest::Client,
    registry: Arc<ServiceRegistry>,
}

impl ModuleGateway {
    pub fn new(registry: Arc<ServiceRegistry>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, registry })
    }

    pub async fn invoke(&self, module: LearningModule, payload: &Value) -> Result<Value, AppError> {
        let service = module.service_name();
        let entry = self
            .registry
            .get(service)
            .ok_or_else(|| AppError::NotFound(format!("No service registered for module '{module}'")))?;
        let base = entry
            .base_url()
            .ok_or_else(|| AppError::NotFound(format!("Service '{service}' has no endpoint")))?;
        let url = format!("{}/modules/{}/invoke", base.trim_end_matches('/'), module.key());

        debug!(%module, %url, "Invoking module");
        match entry.breaker().call(self.send(&url, payload)).await {
            Ok(Ok(body)) => Ok(body),
            Ok(Err(rejection)) => Err(AppError::Validation(format!(
                "module '{module}' rejected the request ({}): {}",
                rejection.status, rejection.body
            ))),
            Err(CallError::Rejected(rejected)) => Err(rejected.into()),
            Err(CallError::Failed(e)) => {
                warn!(%module, service, error = %e, "Module invocation failed");
                Err(AppError::Downstream(format!("{service}: {e}")))
            }
        }
    }

    async fn send(&self, url: &str, payload: &Value) -> Result<Result<Value, ClientRejection>, InvokeError> {
        let response = self.client.post(url).json(payload).send().await?;
        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Ok(Err(ClientRejection {
                status: status.as_u16(),
                body,
            }));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InvokeError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(Ok(response.json::<Value>().await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use crate::metrics::MetricsCollector;
    use crate::services::circuit_breaker::CircuitState;
    use crate::services::registry::RegistryConfig;
    use serde_json::json;

    fn gateway(services: &[ServiceConfig]) -> ModuleGateway {
        let registry = Arc::new(ServiceRegistry::new(
            services,
            RegistryConfig::default(),
            MetricsCollector::new(16),
        ));
        ModuleGateway::new(registry, Duration::from_secs(1)).unwrap()
    }

    #[tokio::test]
    async fn test_unregistered_module_is_not_found() {
        let gw = gateway(&[]);
        let err = gw
            .invoke(LearningModule::ScalabilityLab, &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_open_circuit_fails_fast() {
        let gw = gateway(&[ServiceConfig {
            name: "reliability_drills".to_string(),
            base_url: Some("http://reliability.invalid".to_string()),
        }]);
        let breaker = gw.registry.breaker("reliability_drills").unwrap();
        for _ in 0..5 {
            breaker.try_acquire().unwrap().failure();
        }

        let err = gw
            .invoke(LearningModule::ReliabilityDrills, &json!({"user": "x"}))
            .await
            .unwrap_err();
        match err {
            AppError::DownstreamUnhealthy(rejected) => {
                assert_eq!(rejected.service, "reliability_drills");
                assert_eq!(rejected.state, CircuitState::Open);
            }
            other => panic!("expected fail-fast rejection, got {other:?}"),
        }
    }
}
