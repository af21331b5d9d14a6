/**
 * GATE - Chaîne de contrôle devant toutes les routes /api
 *
 * RÔLE :
 * Aucune requête n'atteint le pipeline d'acquisition sans passer, dans l'ordre :
 * preflight CORS, rate limiting par IP client, clé d'API partagée.
 *
 * FONCTIONNEMENT :
 * - Middleware axum unique posé sur tout le routeur; agit seulement sous /api
 * - OPTIONS => 204 immédiat (les étapes suivantes sont sautées)
 * - Rate limit épuisé => 429 + Retry-After; clé absente/fausse => 401
 * - Secret non configuré => 500
 * - Toute réponse /api (succès, rejet, panique d'un handler) repart avec les en-têtes CORS
 */

pub mod auth;
pub mod cors;
pub mod rate_limit;

pub use cors::CorsPolicy;
pub use rate_limit::{Admission, RateLimitPolicy, RateLimiter};

use crate::cache::SharedBackend;
use crate::config::{KernelConfig, Secret};
use crate::error::AppError;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::FutureExt;
use serde_json::json;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

#[derive(Debug, thiserror::Error)]
pub enum GateRejection {
    #[error("Too many requests, please try again later")]
    RateLimited { retry_after: Duration },
    #[error("API key is required")]
    MissingKey,
    #[error("Invalid API key")]
    InvalidKey,
    #[error("Server configuration error")]
    Misconfigured,
}

impl GateRejection {
    pub fn status(&self) -> StatusCode {
        match self {
            GateRejection::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GateRejection::MissingKey | GateRejection::InvalidKey => StatusCode::UNAUTHORIZED,
            GateRejection::Misconfigured => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GateRejection {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.to_string() }));
        let mut response = (self.status(), body).into_response();
        if let GateRejection::RateLimited { retry_after } = self {
            let seconds = HeaderValue::from(retry_after.as_secs());
            response.headers_mut().insert(header::RETRY_AFTER, seconds);
        }
        response
    }
}

pub struct Gate {
    api_key: Option<Secret>,
    cors: CorsPolicy,
    limiter: RateLimiter,
}

impl Gate {
    pub fn new(config: &KernelConfig, backend: SharedBackend) -> Self {
        Self {
            api_key: config.api_key.clone(),
            cors: CorsPolicy::new(config.cors_origins.clone()),
            limiter: RateLimiter::new(backend, RateLimitPolicy::from(&config.rate_limit)),
        }
    }

    /// Chaîne complète pour une requête /api (hors décoration CORS)
    async fn admit(&self, req: Request, next: Next) -> Response {
        if req.method() == Method::OPTIONS {
            return StatusCode::NO_CONTENT.into_response();
        }

        let client = client_ip(req.headers());
        let agent = user_agent(req.headers());

        if let Admission::Blocked { retry_after } = self.limiter.consume(&client).await {
            warn!(
                client_ip = %client,
                user_agent = %agent,
                retry_after_s = retry_after.as_secs(),
                "rate limit exceeded"
            );
            let retry_after = self.limiter.policy().block;
            return GateRejection::RateLimited { retry_after }.into_response();
        }

        if let Err(rejection) = auth::verify(self.api_key.as_ref(), req.headers()) {
            match rejection {
                GateRejection::Misconfigured => error!("API_KEY is not set, rejecting API request"),
                GateRejection::MissingKey => {
                    warn!(client_ip = %client, "API request received without API key")
                }
                GateRejection::InvalidKey => {
                    warn!(
                        client_ip = %client,
                        user_agent = %agent,
                        "invalid API key used in request"
                    )
                }
                GateRejection::RateLimited { .. } => {}
            }
            return rejection.into_response();
        }

        next.run(req).await
    }
}

pub fn is_gated(path: &str) -> bool {
    path == "/api" || path.starts_with("/api/")
}

/// IP client: premier élément de x-forwarded-for, puis x-real-ip, sinon "unknown"
pub fn client_ip(headers: &HeaderMap) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let real = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    forwarded.or(real).unwrap_or("unknown").to_string()
}

fn user_agent(headers: &HeaderMap) -> String {
    headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string()
}

/// Middleware posé via `middleware::from_fn_with_state`
pub async fn gate_layer(State(gate): State<Arc<Gate>>, req: Request, next: Next) -> Response {
    if !is_gated(req.uri().path()) {
        return next.run(req).await;
    }

    let origin = req.headers().get(header::ORIGIN).cloned();
    let path = req.uri().path().to_string();

    let mut response = match AssertUnwindSafe(gate.admit(req, next)).catch_unwind().await {
        Ok(response) => response,
        Err(_) => {
            AppError::Internal(anyhow::anyhow!("handler panicked on {}", path)).into_response()
        }
    };

    gate.cors.decorate(origin.as_ref(), response.headers_mut());
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_ip_resolution() {
        let mut h = HeaderMap::new();
        assert_eq!(client_ip(&h), "unknown");

        h.insert("x-real-ip", HeaderValue::from_static("10.1.1.1"));
        assert_eq!(client_ip(&h), "10.1.1.1");

        h.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.2"));
        assert_eq!(client_ip(&h), "203.0.113.7");
    }

    #[test]
    fn test_gated_paths() {
        assert!(is_gated("/api/power"));
        assert!(is_gated("/api"));
        assert!(!is_gated("/apiary"));
        assert!(!is_gated("/health"));
    }

    #[test]
    fn test_rejection_statuses() {
        let limited =
            GateRejection::RateLimited { retry_after: Duration::from_secs(120) }.into_response();
        assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(limited.headers()[header::RETRY_AFTER], "120");

        assert_eq!(GateRejection::MissingKey.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(GateRejection::InvalidKey.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(GateRejection::Misconfigured.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
