//! Configuration du kernel PowerWatch
//!
//! Chargée une seule fois au démarrage:
//! 1. fichier YAML `$POWERWATCH_CONFIG` (défaut `kernel.yaml`, absent = valeurs par défaut)
//! 2. surcharges par variables d'environnement (`API_KEY`, `CORS_ORIGINS`, `CACHE_URL`...)
//!
//! Pas de hot-reload: changer la config = redémarrer le process.

use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Erreurs fatales au démarrage (config ou registre de cibles invalide)
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no targets configured")]
    NoTargets,
    #[error("invalid configuration for target {target}: {reason}")]
    InvalidTarget { target: String, reason: String },
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
    #[error("cache backend unavailable: {0}")]
    Cache(String),
}

/// Source de variables d'environnement (process réel ou map de test)
pub trait EnvSource {
    /// Valeur de `key`; une valeur vide compte comme absente
    fn var(&self, key: &str) -> Option<String>;
}

/// L'environnement du process
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.trim().is_empty())
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).filter(|v| !v.trim().is_empty()).cloned()
    }
}

/// Valeur sensible (clé API, mot de passe BMC): jamais affichée par `Debug`
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub bind_addr: SocketAddr,
    /// Secret partagé attendu dans `X-API-Key`; absent = toute requête /api/ répond 500
    pub api_key: Option<Secret>,
    /// Origines autorisées (comparaison exacte)
    pub cors_origins: Vec<String>,
    pub cache: CacheConf,
    pub rate_limit: RateLimitConf,
    pub controllers: ControllerConf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConf {
    /// `memory://` ou `redis://host:port`
    pub url: String,
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConf {
    pub max_requests: u32,
    pub window_secs: u64,
    pub block_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControllerConf {
    pub request_timeout_ms: u64,
    /// Désactive la vérification TLS vers les iLO/iDRAC (certificats auto-signés).
    /// Loggé en warning au démarrage quand actif.
    pub accept_invalid_certs: bool,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            api_key: None,
            cors_origins: Vec::new(),
            cache: CacheConf::default(),
            rate_limit: RateLimitConf::default(),
            controllers: ControllerConf::default(),
        }
    }
}

impl Default for CacheConf {
    fn default() -> Self {
        Self { url: "memory://".into(), ttl_secs: 60 }
    }
}

impl Default for RateLimitConf {
    fn default() -> Self {
        Self { max_requests: 100, window_secs: 60, block_secs: 120 }
    }
}

impl Default for ControllerConf {
    fn default() -> Self {
        Self { request_timeout_ms: 10_000, accept_invalid_certs: true }
    }
}

impl CacheConf {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl RateLimitConf {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn block(&self) -> Duration {
        Duration::from_secs(self.block_secs)
    }
}

impl ControllerConf {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Charge la config: fichier YAML puis surcharges d'environnement
pub fn load_config(env: &impl EnvSource) -> Result<KernelConfig, ConfigError> {
    let path = env.var("POWERWATCH_CONFIG").unwrap_or_else(|| "kernel.yaml".into());
    let mut cfg = KernelConfig::from_file(Path::new(&path))?;
    cfg.apply_env(env)?;
    cfg.validate()?;
    Ok(cfg)
}

impl KernelConfig {
    /// Lit un fichier YAML; fichier absent ou vide = config par défaut
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "no kernel config file, using defaults");
            return Ok(Self::default());
        }
        let txt = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        if txt.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&txt).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Applique les surcharges d'environnement
    pub fn apply_env(&mut self, env: &impl EnvSource) -> Result<(), ConfigError> {
        if let Some(v) = env.var("BIND_ADDR") {
            self.bind_addr = parse_value("BIND_ADDR", &v)?;
        }
        if let Some(v) = env.var("API_KEY") {
            self.api_key = Some(Secret::new(v));
        }
        if let Some(v) = env.var("CORS_ORIGINS") {
            self.cors_origins = split_origins(&v);
        }
        if let Some(v) = env.var("CACHE_URL").or_else(|| env.var("REDIS_URL")) {
            self.cache.url = v;
        }
        if let Some(v) = env.var("CACHE_TTL") {
            self.cache.ttl_secs = parse_value("CACHE_TTL", &v)?;
        }
        if let Some(v) = env.var("RATE_LIMIT_MAX_REQUESTS") {
            self.rate_limit.max_requests = parse_value("RATE_LIMIT_MAX_REQUESTS", &v)?;
        }
        if let Some(v) = env.var("RATE_LIMIT_WINDOW") {
            self.rate_limit.window_secs = parse_value("RATE_LIMIT_WINDOW", &v)?;
        }
        if let Some(v) = env.var("RATE_LIMIT_BLOCK") {
            self.rate_limit.block_secs = parse_value("RATE_LIMIT_BLOCK", &v)?;
        }
        if let Some(v) = env.var("SERVER_REQUEST_TIMEOUT") {
            self.controllers.request_timeout_ms = parse_value("SERVER_REQUEST_TIMEOUT", &v)?;
        }
        if let Some(v) = env.var("ACCEPT_INVALID_CERTS") {
            self.controllers.accept_invalid_certs = parse_bool("ACCEPT_INVALID_CERTS", &v)?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<(), ConfigError> {
        // une clé vide dans le YAML équivaut à pas de clé
        if self.api_key.as_ref().is_some_and(Secret::is_empty) {
            self.api_key = None;
        }
        if self.rate_limit.max_requests == 0 {
            return Err(ConfigError::InvalidValue {
                key: "rate_limit.max_requests",
                value: "0".into(),
            });
        }
        if self.rate_limit.window_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "rate_limit.window_secs",
                value: "0".into(),
            });
        }
        if self.cache.ttl_secs == 0 {
            return Err(ConfigError::InvalidValue { key: "cache.ttl_secs", value: "0".into() });
        }
        Ok(())
    }
}

/// "http://a, http://b," -> ["http://a", "http://b"]
pub fn split_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .map(String::from)
        .collect()
}

fn parse_value<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue { key, value: value.to_string() })
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue { key, value: value.to_string() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_defaults_without_file() {
        let env = env(&[("POWERWATCH_CONFIG", "/nonexistent/kernel.yaml")]);
        let cfg = load_config(&env).unwrap();

        assert_eq!(cfg.bind_addr.port(), 8080);
        assert!(cfg.api_key.is_none());
        assert_eq!(cfg.cache.url, "memory://");
        assert_eq!(cfg.cache.ttl(), Duration::from_secs(60));
        assert_eq!(cfg.rate_limit.max_requests, 100);
        assert_eq!(cfg.rate_limit.window(), Duration::from_secs(60));
        assert_eq!(cfg.rate_limit.block(), Duration::from_secs(120));
        assert_eq!(cfg.controllers.request_timeout(), Duration::from_secs(10));
        assert!(cfg.controllers.accept_invalid_certs);
    }

    #[test]
    fn test_env_overrides() {
        let env = env(&[
            ("POWERWATCH_CONFIG", "/nonexistent/kernel.yaml"),
            ("API_KEY", "s3cr3t"),
            ("CORS_ORIGINS", "http://localhost:3000, https://dash.example.com,"),
            ("REDIS_URL", "redis://cache:6379"),
            ("RATE_LIMIT_MAX_REQUESTS", "5"),
            ("SERVER_REQUEST_TIMEOUT", "2500"),
            ("ACCEPT_INVALID_CERTS", "false"),
        ]);
        let cfg = load_config(&env).unwrap();

        assert_eq!(cfg.api_key.unwrap().expose(), "s3cr3t");
        assert_eq!(cfg.cors_origins, vec!["http://localhost:3000", "https://dash.example.com"]);
        assert_eq!(cfg.cache.url, "redis://cache:6379");
        assert_eq!(cfg.rate_limit.max_requests, 5);
        assert_eq!(cfg.controllers.request_timeout(), Duration::from_millis(2500));
        assert!(!cfg.controllers.accept_invalid_certs);
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let env = env(&[
            ("POWERWATCH_CONFIG", "/nonexistent/kernel.yaml"),
            ("RATE_LIMIT_WINDOW", "one minute"),
        ]);
        match load_config(&env) {
            Err(ConfigError::InvalidValue { key, .. }) => assert_eq!(key, "RATE_LIMIT_WINDOW"),
            other => panic!("expected InvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn test_yaml_file_then_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kernel.yaml");
        std::fs::write(
            &path,
            "bind_addr: 127.0.0.1:9000\napi_key: from-file\nrate_limit:\n  max_requests: 10\n",
        )
        .unwrap();

        let env = env(&[
            ("POWERWATCH_CONFIG", path.to_str().unwrap()),
            ("API_KEY", "from-env"),
        ]);
        let cfg = load_config(&env).unwrap();

        assert_eq!(cfg.bind_addr.port(), 9000);
        assert_eq!(cfg.rate_limit.max_requests, 10);
        assert_eq!(cfg.rate_limit.window_secs, 60);
        assert_eq!(cfg.api_key.unwrap().expose(), "from-env");
    }

    #[test]
    fn test_broken_yaml_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kernel.yaml");
        std::fs::write(&path, "rate_limit: [not, a, map]\n").unwrap();

        let env = env(&[("POWERWATCH_CONFIG", path.to_str().unwrap())]);
        assert!(matches!(load_config(&env), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let secret = Secret::new("hunter2");
        assert_eq!(format!("{:?}", secret), "Secret(***)");
    }
}
