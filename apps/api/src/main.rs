mod config;
mod db;
mod engine;
mod errors;
mod llm_client;
mod metrics;
mod models;
mod routes;
mod services;
mod state;
mod store;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::db::create_pool;
use crate::engine::decision::DecisionEngine;
use crate::engine::explanation::{Explainer, LlmExplainer};
use crate::llm_client::LlmClient;
use crate::metrics::MetricsCollector;
use crate::routes::build_router;
use crate::services::gateway::ModuleGateway;
use crate::services::probe::HttpHealthProbe;
use crate::services::registry::ServiceRegistry;
use crate::state::AppState;
use crate::store::manager::StateManager;
use crate::store::memory::InMemoryStateStore;
use crate::store::postgres::PgStateStore;
use crate::store::StateStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on malformed env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting SkillRoute API v{}", env!("CARGO_PKG_VERSION"));

    let metrics = MetricsCollector::new(config.histogram_capacity);

    // State store: PostgreSQL when configured, otherwise process-local memory
    let store: Arc<dyn StateStore> = match &config.database_url {
        Some(url) => Arc::new(PgStateStore::new(create_pool(url).await?)),
        None => {
            warn!("DATABASE_URL not set; using in-memory state store (state is lost on restart)");
            Arc::new(InMemoryStateStore::new())
        }
    };

    let engine_config = config.engine_config();
    let state_manager = StateManager::new(store);

    // Explanation provider (optional)
    let explainer: Option<Arc<dyn Explainer>> = match &config.anthropic_api_key {
        Some(key) => {
            let llm = LlmClient::new(key.clone(), config.explanation_timeout)
                .context("Failed to build LLM client")?;
            info!("LLM client initialized (model: {})", llm_client::MODEL);
            Some(Arc::new(LlmExplainer(llm)) as Arc<dyn Explainer>)
        }
        None => {
            warn!("ANTHROPIC_API_KEY not set; decisions will carry fallback reasons only");
            None
        }
    };

    // Service registry + background health monitoring
    let registry = Arc::new(ServiceRegistry::new(
        &config.services,
        config.registry_config(),
        metrics.clone(),
    ));
    let probe = HttpHealthProbe::new(config.probe_timeout).context("Failed to build probe client")?;
    let shutdown = CancellationToken::new();
    let monitor = registry.spawn_monitor(Arc::new(probe), config.probe_interval, shutdown.child_token());

    let gateway = ModuleGateway::new(registry.clone(), config.module_timeout)
        .context("Failed to build module gateway client")?;

    let engine = DecisionEngine::new(
        state_manager.clone(),
        engine_config,
        explainer,
        registry.clone(),
        metrics.clone(),
    );

    let state = AppState {
        engine: Arc::new(engine),
        state_manager,
        registry,
        gateway: Arc::new(gateway),
        metrics,
    };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    monitor.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal(token: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        token.cancelled().await;
        return;
    }
    info!("Shutdown signal received");
    token.cancel();
}
