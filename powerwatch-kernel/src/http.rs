/**
 * API REST POWERWATCH - Surface HTTP du kernel
 *
 * RÔLE :
 * Exposer les mesures de puissance au dashboard, derrière le gate (CORS,
 * rate limit, clé d'API), et l'état du service sur /health.
 *
 * FONCTIONNEMENT :
 * - GET /api/power, GET /api/power/{name} : lecture cache-aside via PowerMonitor
 * - GET /api/servers : registre des cibles, sans secrets
 * - DELETE /api/cache, DELETE /api/cache/{name} : administration du cache
 * - GET /health : hors /api donc non gardé; 200 si healthy, 503 sinon
 *
 * SÉCURITÉ :
 * - Le middleware gate est posé sur tout le routeur (404 et 405 compris)
 * - Les erreurs internes ne renvoient jamais de détail au client
 */

use crate::error::AppError;
use crate::gate::{gate_layer, Gate};
use crate::health::{HealthTracker, KernelHealth};
use crate::models::PowerReading;
use crate::targets::TargetView;
use crate::telemetry::PowerMonitor;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::routing::{delete, get};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub monitor: PowerMonitor,
    pub health: HealthTracker,
}

pub fn build_router(app_state: AppState, gate: Arc<Gate>) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/api/power", get(get_power))
        .route("/api/power/{name}", get(get_server_power))
        .route("/api/servers", get(list_servers))
        .route("/api/cache", delete(clear_cache))
        .route("/api/cache/{name}", delete(invalidate_cache))
        .with_state(app_state)
        .layer(middleware::from_fn_with_state(gate, gate_layer))
}

// GET /api/power (lot complet, ordre du registre)
async fn get_power(State(app): State<AppState>) -> Json<Vec<PowerReading>> {
    Json(app.monitor.fetch_registry().await)
}

// GET /api/power/{name}
async fn get_server_power(
    State(app): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<PowerReading>, AppError> {
    let target = app.monitor.registry().get(&name).ok_or(AppError::NotFound(name))?;
    Ok(Json(app.monitor.fetch_one(target).await))
}

// GET /api/servers
async fn list_servers(State(app): State<AppState>) -> Json<Vec<TargetView>> {
    Json(app.monitor.registry().views())
}

// DELETE /api/cache
async fn clear_cache(State(app): State<AppState>) -> Result<Json<Value>, AppError> {
    match app.monitor.cache().clear_all().await {
        crate::cache::CacheOutcome::Ok(cleared) => Ok(Json(json!({ "cleared": cleared }))),
        crate::cache::CacheOutcome::Degraded(_) => Err(AppError::CacheUnavailable),
    }
}

// DELETE /api/cache/{name}
async fn invalidate_cache(
    State(app): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, AppError> {
    if app.monitor.registry().get(&name).is_none() {
        return Err(AppError::NotFound(name));
    }
    if app.monitor.cache().invalidate(&name).await.is_degraded() {
        return Err(AppError::CacheUnavailable);
    }
    Ok(Json(json!({ "invalidated": name })))
}

// GET /health (non gardé)
async fn get_health(State(app): State<AppState>) -> (StatusCode, Json<KernelHealth>) {
    let health = app.health.check(app.monitor.registry(), app.monitor.cache()).await;
    let code = if health.status.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(health))
}
