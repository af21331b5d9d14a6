/**
 * CACHE DES MESURES - Couche cache-aside devant les contrôleurs
 *
 * RÔLE :
 * Limiter la charge sur des firmwares de management lents et fragiles: une mesure
 * réussie est gardée 60s, les lectures suivantes ne touchent pas le contrôleur.
 *
 * FONCTIONNEMENT :
 * - CacheBackend = primitives clé/valeur (get, set avec expiration, scan par préfixe,
 *   incrément atomique...) implémentées par la mémoire du process ou Redis
 * - Cache = façade "fail-open" : une panne du backend ne fait jamais échouer l'appelant,
 *   elle remonte comme `CacheOutcome::Degraded` (loggé) et l'appelant continue sans cache
 * - Les mesures vivent sous `server-power:`, l'état du rate limiter sous `ratelimit:`
 */

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis_store;

pub use memory::MemoryBackend;

use crate::config::ConfigError;
use crate::models::PowerReading;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Espace de noms des mesures
pub const POWER_PREFIX: &str = "server-power:";
/// Espace de noms du rate limiter (disjoint des mesures)
pub const RATE_LIMIT_PREFIX: &str = "ratelimit:";

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
    #[error("malformed cache entry {key}: {source}")]
    Malformed {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Résultat d'un incrément atomique
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counter {
    pub count: u64,
    /// Temps restant avant expiration de la clé
    pub ttl: Duration,
}

/// Primitives attendues d'un backend de cache partagé.
///
/// Chaque primitive doit être atomique par clé: c'est la seule garantie
/// sur laquelle repose le rate limiting.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError>;
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;
    /// Retourne le nombre de clés effectivement supprimées
    async fn delete(&self, keys: &[String]) -> Result<u64, CacheError>;
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheError>;
    /// Incrémente `key`; l'expiration `ttl` n'est posée qu'à la création
    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<Counter, CacheError>;
    /// Temps restant d'une clé vivante, `None` si absente
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError>;
    async fn ping(&self) -> Result<(), CacheError>;
}

pub type SharedBackend = Arc<dyn CacheBackend>;

/// Construit le backend depuis `cache.url` (`memory://` ou `redis://...`)
pub async fn connect(url: &str) -> Result<SharedBackend, ConfigError> {
    if url.is_empty() || url.starts_with("memory://") {
        return Ok(Arc::new(MemoryBackend::new()));
    }
    if url.starts_with("redis://") || url.starts_with("rediss://") {
        #[cfg(feature = "redis")]
        {
            let backend = redis_store::RedisBackend::connect(url)
                .await
                .map_err(|e| ConfigError::Cache(e.to_string()))?;
            return Ok(Arc::new(backend));
        }
        #[cfg(not(feature = "redis"))]
        {
            return Err(ConfigError::Cache(
                "redis:// cache requested but the kernel was built without the `redis` feature"
                    .into(),
            ));
        }
    }
    Err(ConfigError::InvalidValue { key: "CACHE_URL", value: url.to_string() })
}

/// Résultat d'une opération de cache: la valeur, ou une dégradation observable
#[derive(Debug)]
#[must_use]
pub enum CacheOutcome<T> {
    Ok(T),
    Degraded(CacheError),
}

impl<T> CacheOutcome<T> {
    pub fn is_degraded(&self) -> bool {
        matches!(self, CacheOutcome::Degraded(_))
    }

    /// Valeur "fail-open": en cas de dégradation, comme si le cache était vide
    pub fn into_value(self) -> T
    where
        T: Default,
    {
        match self {
            CacheOutcome::Ok(value) => value,
            CacheOutcome::Degraded(_) => T::default(),
        }
    }
}

fn degraded<T>(op: &'static str, key: &str, err: CacheError) -> CacheOutcome<T> {
    warn!(op, key, error = %err, "cache degraded, continuing without it");
    CacheOutcome::Degraded(err)
}

/// Façade fail-open des mesures de puissance
#[derive(Clone)]
pub struct Cache {
    backend: SharedBackend,
    prefix: &'static str,
    ttl: Duration,
}

impl Cache {
    pub fn new(backend: SharedBackend, ttl: Duration) -> Self {
        Self { backend, prefix: POWER_PREFIX, ttl }
    }

    fn key(&self, server_name: &str) -> String {
        format!("{}{}", self.prefix, server_name)
    }

    /// Lecture d'une mesure; payload illisible = absent (dégradé)
    pub async fn get(&self, server_name: &str) -> CacheOutcome<Option<PowerReading>> {
        let key = self.key(server_name);
        match self.backend.get(&key).await {
            Ok(None) => CacheOutcome::Ok(None),
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(reading) => CacheOutcome::Ok(Some(reading)),
                Err(source) => {
                    degraded("get", &key, CacheError::Malformed { key: key.clone(), source })
                }
            },
            Err(e) => degraded("get", &key, e),
        }
    }

    /// Écriture avec le TTL configuré
    pub async fn set(&self, reading: &PowerReading) -> CacheOutcome<()> {
        self.set_with_ttl(reading, self.ttl).await
    }

    pub async fn set_with_ttl(&self, reading: &PowerReading, ttl: Duration) -> CacheOutcome<()> {
        let key = self.key(&reading.server_name);
        let payload = match serde_json::to_string(reading) {
            Ok(p) => p,
            Err(source) => {
                return degraded("set", &key, CacheError::Malformed { key: key.clone(), source })
            }
        };
        match self.backend.set_ex(&key, &payload, ttl).await {
            Ok(()) => CacheOutcome::Ok(()),
            Err(e) => degraded("set", &key, e),
        }
    }

    /// Toutes les mesures vivantes du namespace; les entrées illisibles sont ignorées
    pub async fn list_all(&self) -> CacheOutcome<Vec<PowerReading>> {
        let keys = match self.backend.scan_prefix(self.prefix).await {
            Ok(keys) => keys,
            Err(e) => return degraded("list_all", self.prefix, e),
        };
        if keys.is_empty() {
            return CacheOutcome::Ok(Vec::new());
        }
        let values = match self.backend.get_many(&keys).await {
            Ok(values) => values,
            Err(e) => return degraded("list_all", self.prefix, e),
        };

        let readings = keys
            .iter()
            .zip(values)
            .filter_map(|(key, raw)| {
                let raw = raw?;
                match serde_json::from_str::<PowerReading>(&raw) {
                    Ok(reading) => Some(reading),
                    Err(e) => {
                        warn!(key = %key, error = %e, "skipping malformed cache entry");
                        None
                    }
                }
            })
            .collect();
        CacheOutcome::Ok(readings)
    }

    pub async fn invalidate(&self, server_name: &str) -> CacheOutcome<()> {
        let key = self.key(server_name);
        match self.backend.delete(std::slice::from_ref(&key)).await {
            Ok(_) => CacheOutcome::Ok(()),
            Err(e) => degraded("invalidate", &key, e),
        }
    }

    /// Vide le namespace des mesures; retourne le nombre d'entrées supprimées
    pub async fn clear_all(&self) -> CacheOutcome<u64> {
        let keys = match self.backend.scan_prefix(self.prefix).await {
            Ok(keys) => keys,
            Err(e) => return degraded("clear_all", self.prefix, e),
        };
        if keys.is_empty() {
            return CacheOutcome::Ok(0);
        }
        match self.backend.delete(&keys).await {
            Ok(n) => CacheOutcome::Ok(n),
            Err(e) => degraded("clear_all", self.prefix, e),
        }
    }

    /// Sonde de vie du backend (utilisée par le health)
    pub async fn ping(&self) -> Result<(), CacheError> {
        self.backend.ping().await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Backend toujours en panne, pour vérifier le comportement fail-open
    pub(crate) struct DownBackend;

    #[async_trait]
    impl CacheBackend for DownBackend {
        async fn get(&self, _: &str) -> Result<Option<String>, CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }
        async fn get_many(&self, _: &[String]) -> Result<Vec<Option<String>>, CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }
        async fn set_ex(&self, _: &str, _: &str, _: Duration) -> Result<(), CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }
        async fn delete(&self, _: &[String]) -> Result<u64, CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }
        async fn scan_prefix(&self, _: &str) -> Result<Vec<String>, CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }
        async fn incr_with_expiry(&self, _: &str, _: Duration) -> Result<Counter, CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }
        async fn ttl(&self, _: &str) -> Result<Option<Duration>, CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }
        async fn ping(&self) -> Result<(), CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }
    }

    fn memory_cache() -> (Cache, MemoryBackend) {
        let backend = MemoryBackend::new();
        (Cache::new(Arc::new(backend.clone()), Duration::from_secs(60)), backend)
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let (cache, backend) = memory_cache();
        let reading = PowerReading::success("web-01", 340.0);

        assert!(!cache.set(&reading).await.is_degraded());
        assert!(backend.get("server-power:web-01").await.unwrap().is_some());
        assert_eq!(cache.get("web-01").await.into_value(), Some(reading));
        assert_eq!(cache.get("db-01").await.into_value(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let (cache, _) = memory_cache();
        cache.set(&PowerReading::success("web-01", 340.0)).await.into_value();

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cache.get("web-01").await.into_value().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get("web-01").await.into_value().is_none());
    }

    #[tokio::test]
    async fn test_malformed_payload_is_absent_and_degraded() {
        let (cache, backend) = memory_cache();
        backend
            .set_ex("server-power:web-01", "{not json", Duration::from_secs(60))
            .await
            .unwrap();

        let outcome = cache.get("web-01").await;
        assert!(outcome.is_degraded());
        assert_eq!(outcome.into_value(), None);
    }

    #[tokio::test]
    async fn test_list_all_skips_other_namespaces_and_garbage() {
        let (cache, backend) = memory_cache();
        cache.set(&PowerReading::success("web-01", 340.0)).await.into_value();
        cache.set(&PowerReading::success("web-02", 120.0)).await.into_value();
        backend.set_ex("server-power:broken", "???", Duration::from_secs(60)).await.unwrap();
        backend.set_ex("ratelimit:points:1.2.3.4", "7", Duration::from_secs(60)).await.unwrap();

        let mut names: Vec<String> = cache
            .list_all()
            .await
            .into_value()
            .into_iter()
            .map(|r| r.server_name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["web-01", "web-02"]);
    }

    #[tokio::test]
    async fn test_invalidate_and_clear_all() {
        let (cache, backend) = memory_cache();
        for name in ["a", "b", "c"] {
            cache.set(&PowerReading::success(name, 100.0)).await.into_value();
        }
        backend.set_ex("ratelimit:points:x", "1", Duration::from_secs(60)).await.unwrap();

        cache.invalidate("a").await.into_value();
        assert!(cache.get("a").await.into_value().is_none());

        assert_eq!(cache.clear_all().await.into_value(), 2);
        assert!(cache.list_all().await.into_value().is_empty());
        // le namespace du rate limiter n'est pas touché
        assert!(backend.get("ratelimit:points:x").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_down_backend_fails_open() {
        let cache = Cache::new(Arc::new(DownBackend), Duration::from_secs(60));
        let reading = PowerReading::success("web-01", 340.0);

        let got = cache.get("web-01").await;
        assert!(got.is_degraded());
        assert_eq!(got.into_value(), None);

        assert!(cache.set(&reading).await.is_degraded());
        assert!(cache.list_all().await.into_value().is_empty());
        assert!(cache.invalidate("web-01").await.is_degraded());
        assert!(cache.clear_all().await.is_degraded());
        assert!(cache.ping().await.is_err());
    }

    #[tokio::test]
    async fn test_connect_selects_backend() {
        let backend = connect("memory://").await.unwrap();
        assert!(backend.ping().await.is_ok());

        assert!(matches!(
            connect("memcached://localhost").await,
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
