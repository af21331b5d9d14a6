//! Backend Redis partagé entre instances.
//!
//! `ConnectionManager` se reconnecte seul; chaque appel clone la connexion.
//! Les clés sont parcourues par SCAN, jamais par KEYS.

use super::{CacheBackend, CacheError, Counter};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::time::Duration;

const SCAN_BATCH: usize = 200;

/// INCR + PEXPIRE à la création, en un seul aller-retour atomique
const INCR_WITH_EXPIRY: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return {count, redis.call('PTTL', KEYS[1])}
"#;

fn backend_err(err: redis::RedisError) -> CacheError {
    CacheError::Backend(err.to_string())
}

fn millis(d: Duration) -> u64 {
    d.as_millis().max(1).min(u64::MAX as u128) as u64
}

#[derive(Clone)]
pub struct RedisBackend {
    conn: ConnectionManager,
    incr_script: Script,
}

impl RedisBackend {
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url).map_err(backend_err)?;
        let conn = ConnectionManager::new(client).await.map_err(backend_err)?;
        Ok(Self { conn, incr_script: Script::new(INCR_WITH_EXPIRY) })
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        conn.get::<_, Option<String>>(key).await.map_err(backend_err)
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        redis::cmd("MGET")
            .arg(keys)
            .query_async::<_, Vec<Option<String>>>(&mut conn)
            .await
            .map_err(backend_err)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(millis(ttl))
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(backend_err)
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, CacheError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        redis::cmd("DEL")
            .arg(keys)
            .query_async::<_, u64>(&mut conn)
            .await
            .map_err(backend_err)
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", prefix);
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(backend_err)?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<Counter, CacheError> {
        let mut conn = self.conn.clone();
        let (count, pttl): (u64, i64) = self
            .incr_script
            .key(key)
            .arg(millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(backend_err)?;
        let ttl = if pttl > 0 { Duration::from_millis(pttl as u64) } else { ttl };
        Ok(Counter { count, ttl })
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError> {
        let mut conn = self.conn.clone();
        let pttl: i64 = redis::cmd("PTTL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(backend_err)?;
        // -2: absente, -1: sans expiration (jamais posé par nous)
        Ok((pttl > 0).then(|| Duration::from_millis(pttl as u64)))
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(backend_err)
    }
}
