//! Rate limiting par adresse client, état stocké dans le backend de cache.
//!
//! `ratelimit:points:{ip}` compte les requêtes de la fenêtre courante
//! (expiration posée au premier hit). Au-delà du quota, `ratelimit:block:{ip}`
//! bloque la clé pour toute la durée de blocage, quelle que soit la fenêtre.

use crate::cache::{SharedBackend, RATE_LIMIT_PREFIX};
use crate::config::RateLimitConf;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub max_requests: u32,
    pub window: Duration,
    pub block: Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self::from(&RateLimitConf::default())
    }
}

impl From<&RateLimitConf> for RateLimitPolicy {
    fn from(conf: &RateLimitConf) -> Self {
        Self { max_requests: conf.max_requests, window: conf.window(), block: conf.block() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted { remaining: u32, resets_in: Duration },
    Blocked { retry_after: Duration },
    /// Backend indisponible: requête admise sans comptage
    Unmetered,
}

impl Admission {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Admission::Blocked { .. })
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    backend: SharedBackend,
    policy: RateLimitPolicy,
}

impl RateLimiter {
    pub fn new(backend: SharedBackend, policy: RateLimitPolicy) -> Self {
        Self { backend, policy }
    }

    pub fn policy(&self) -> RateLimitPolicy {
        self.policy
    }

    fn points_key(client: &str) -> String {
        format!("{}points:{}", RATE_LIMIT_PREFIX, client)
    }

    fn block_key(client: &str) -> String {
        format!("{}block:{}", RATE_LIMIT_PREFIX, client)
    }

    /// Consomme un point pour `client`
    pub async fn consume(&self, client: &str) -> Admission {
        match self.try_consume(client).await {
            Ok(admission) => admission,
            Err(e) => {
                warn!(
                    client_ip = %client,
                    error = %e,
                    "rate limiter backend unavailable, admitting request"
                );
                Admission::Unmetered
            }
        }
    }

    async fn try_consume(&self, client: &str) -> Result<Admission, crate::cache::CacheError> {
        let block_key = Self::block_key(client);
        if let Some(retry_after) = self.backend.ttl(&block_key).await? {
            return Ok(Admission::Blocked { retry_after });
        }

        let counter = self
            .backend
            .incr_with_expiry(&Self::points_key(client), self.policy.window)
            .await?;
        let max = u64::from(self.policy.max_requests);
        if counter.count > max {
            self.backend.set_ex(&block_key, "1", self.policy.block).await?;
            return Ok(Admission::Blocked { retry_after: self.policy.block });
        }

        Ok(Admission::Admitted {
            remaining: (max - counter.count) as u32,
            resets_in: counter.ttl,
        })
    }
}
