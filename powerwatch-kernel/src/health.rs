/**
 * HEALTH - État global du service PowerWatch
 *
 * RÔLE :
 * Répondre à /health à partir de ce qui est déjà connu : joignabilité du backend
 * de cache et mesures vivantes en cache, rapportées au nombre de cibles.
 *
 * FONCTIONNEMENT :
 * - Ping du backend et lecture du namespace des mesures lancés en parallèle
 * - classify() est pure : (backend joignable, cibles en ligne, total) -> statut
 * - Aucun appel aux contrôleurs : le health ne charge jamais les firmwares
 */

use crate::cache::Cache;
use crate::models::PowerReading;
use crate::targets::TargetRegistry;
use serde::Serialize;
use std::collections::HashSet;
use std::time::Instant;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn is_healthy(self) -> bool {
        self == HealthStatus::Healthy
    }
}

/// >= 90% en ligne: healthy, >= 50%: degraded, sinon (ou aucun cible) unhealthy
pub fn classify(backend_reachable: bool, online: usize, total: usize) -> HealthStatus {
    if !backend_reachable || total == 0 {
        return HealthStatus::Unhealthy;
    }
    if online * 10 >= total * 9 {
        HealthStatus::Healthy
    } else if online * 2 >= total {
        HealthStatus::Degraded
    } else {
        HealthStatus::Unhealthy
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatus {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentError {
    pub server_name: String,
    pub error: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringStatus {
    pub total_servers: usize,
    pub online_servers: usize,
    pub offline_servers: usize,
    #[serde(with = "time::serde::rfc3339::option", skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<OffsetDateTime>,
    pub recent_errors: Vec<RecentError>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Services {
    pub cache: CacheStatus,
    pub server_monitoring: MonitoringStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KernelHealth {
    pub status: HealthStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub version: &'static str,
    pub services: Services,
    pub uptime_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_usage_mb: Option<f32>,
}

fn monitoring(registry: &TargetRegistry, cached: Vec<PowerReading>) -> MonitoringStatus {
    let known: HashSet<&str> = registry.targets().iter().map(|t| t.name.as_str()).collect();
    let cached: Vec<PowerReading> = cached
        .into_iter()
        .filter(|r| known.contains(r.server_name.as_str()))
        .collect();

    let total = registry.len();
    let online = cached.iter().filter(|r| !r.is_error()).count().min(total);
    let recent_errors = cached
        .iter()
        .filter_map(|r| {
            r.error.as_ref().map(|e| RecentError {
                server_name: r.server_name.clone(),
                error: e.clone(),
                timestamp: r.timestamp,
            })
        })
        .collect();

    MonitoringStatus {
        total_servers: total,
        online_servers: online,
        offline_servers: total - online,
        last_update_time: cached.iter().map(|r| r.timestamp).max(),
        recent_errors,
    }
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self { start_time: Instant::now() }
    }

    pub async fn check(&self, registry: &TargetRegistry, cache: &Cache) -> KernelHealth {
        let (ping, cached) = tokio::join!(cache.ping(), cache.list_all());

        let cache_status = match &ping {
            Ok(()) => CacheStatus { status: "connected", error: None },
            Err(e) => {
                tracing::error!(error = %e, "cache health check failed");
                CacheStatus { status: "disconnected", error: Some(e.to_string()) }
            }
        };
        let server_monitoring = monitoring(registry, cached.into_value());
        let status = classify(
            ping.is_ok(),
            server_monitoring.online_servers,
            server_monitoring.total_servers,
        );

        tracing::info!(
            status = ?status,
            cache = cache_status.status,
            servers = server_monitoring.total_servers,
            online = server_monitoring.online_servers,
            "health check performed"
        );

        KernelHealth {
            status,
            timestamp: OffsetDateTime::now_utc(),
            version: env!("CARGO_PKG_VERSION"),
            services: Services { cache: cache_status, server_monitoring },
            uptime_seconds: self.start_time.elapsed().as_secs(),
            memory_usage_mb: memory_usage_mb(),
        }
    }
}

/// RSS du process en Mo (Linux, via /proc), `None` ailleurs
pub fn memory_usage_mb() -> Option<f32> {
    #[cfg(target_os = "linux")]
    {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        let kb = status
            .lines()
            .find(|l| l.starts_with("VmRSS:"))?
            .split_whitespace()
            .nth(1)?
            .parse::<u64>()
            .ok()?;
        Some(kb as f32 / 1024.0)
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tests::DownBackend;
    use crate::cache::MemoryBackend;
    use crate::config::Secret;
    use crate::targets::{ControllerKind, TargetDescriptor};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_classification_thresholds() {
        assert_eq!(classify(true, 9, 10), HealthStatus::Healthy);
        assert_eq!(classify(true, 10, 10), HealthStatus::Healthy);
        assert_eq!(classify(true, 5, 10), HealthStatus::Degraded);
        assert_eq!(classify(true, 4, 10), HealthStatus::Unhealthy);
        assert_eq!(classify(false, 10, 10), HealthStatus::Unhealthy);
        assert_eq!(classify(true, 0, 0), HealthStatus::Unhealthy);
    }

    fn registry(n: usize) -> TargetRegistry {
        let targets = (0..n)
            .map(|i| TargetDescriptor {
                name: format!("srv-{}", i),
                kind: ControllerKind::Ilo,
                address: format!("10.0.0.{}", i + 1),
                username: "admin".into(),
                password: Secret::new("pw"),
            })
            .collect();
        TargetRegistry::new(targets).unwrap()
    }

    #[tokio::test]
    async fn test_check_counts_cached_readings() {
        let registry = registry(10);
        let cache = Cache::new(Arc::new(MemoryBackend::new()), Duration::from_secs(60));
        for i in 0..5 {
            cache.set(&PowerReading::success(&format!("srv-{}", i), 100.0)).await.into_value();
        }
        cache.set(&PowerReading::failure("srv-7", "HTTP error: status 500")).await.into_value();
        // mesure d'une cible retirée de la config: ignorée
        cache.set(&PowerReading::success("decommissioned", 80.0)).await.into_value();

        let health = HealthTracker::new().check(&registry, &cache).await;
        assert_eq!(health.status, HealthStatus::Degraded);
        assert_eq!(health.services.server_monitoring.online_servers, 5);
        assert_eq!(health.services.server_monitoring.offline_servers, 5);
        assert_eq!(health.services.server_monitoring.recent_errors.len(), 1);
        assert_eq!(health.services.cache.status, "connected");

        let json = serde_json::to_value(&health).unwrap();
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["services"]["serverMonitoring"]["totalServers"], 10);
        assert_eq!(json["services"]["serverMonitoring"]["recentErrors"][0]["serverName"], "srv-7");
        assert!(json["uptimeSeconds"].is_u64());
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_unhealthy() {
        let cache = Cache::new(Arc::new(DownBackend), Duration::from_secs(60));
        let health = HealthTracker::new().check(&registry(3), &cache).await;

        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert_eq!(health.services.cache.status, "disconnected");
        assert!(health.services.cache.error.is_some());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_memory_usage_is_read() {
        assert!(memory_usage_mb().unwrap() > 0.0);
    }
}
