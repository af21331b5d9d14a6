/**
 * POWERWATCH KERNEL - Point d'entrée du service
 *
 * RÔLE : Charger la configuration et le registre des cibles une seule fois,
 * construire cache, client Redfish, pipeline et gate, puis servir l'API HTTP.
 *
 * Toute erreur de configuration est fatale au démarrage.
 */

use anyhow::Context;
use powerwatch_kernel::cache::{self, Cache};
use powerwatch_kernel::config::{load_config, ProcessEnv};
use powerwatch_kernel::gate::Gate;
use powerwatch_kernel::health::HealthTracker;
use powerwatch_kernel::http::{build_router, AppState};
use powerwatch_kernel::targets::TargetRegistry;
use powerwatch_kernel::telemetry::{PowerMonitor, RedfishClient};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into());
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env optionnel
    dotenvy::dotenv().ok();
    init_tracing();

    let config = load_config(&ProcessEnv).context("invalid kernel configuration")?;
    let registry = Arc::new(TargetRegistry::load(&ProcessEnv).context("invalid target registry")?);
    info!(targets = registry.len(), "target registry loaded");

    if config.controllers.accept_invalid_certs {
        warn!(
            "TLS certificate verification towards controllers is DISABLED \
             (ACCEPT_INVALID_CERTS=true)"
        );
    }
    if config.api_key.is_none() {
        warn!("API_KEY is not set: every /api request will be answered with 500");
    }

    let backend = cache::connect(&config.cache.url).await.context("cache backend")?;
    let client = RedfishClient::new(&config.controllers).context("HTTP client")?;
    let cache = Cache::new(backend.clone(), config.cache.ttl());
    let monitor = PowerMonitor::new(registry, cache, client);
    let gate = Arc::new(Gate::new(&config, backend));

    let app = build_router(AppState { monitor, health: HealthTracker::new() }, gate);

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("bind {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "powerwatch kernel listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("powerwatch kernel stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
