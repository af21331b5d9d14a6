//! Backend en mémoire du process.
//!
//! Une seule `Mutex` protège toute la table: chaque primitive s'exécute
//! entièrement sous le verrou, ce qui donne l'atomicité par clé.
//! Les expirations sont paresseuses: purgées à la lecture, au scan, et par
//! un balayage complet au plus une fois par `SWEEP_INTERVAL` lors d'une écriture.

use super::{CacheBackend, CacheError, Counter};
use async_trait::async_trait;
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
struct Slot {
    value: String,
    deadline: Instant,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        self.deadline > now
    }
}

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct Table {
    slots: HashMap<String, Slot>,
    last_sweep: Instant,
}

#[derive(Clone)]
pub struct MemoryBackend {
    table: Arc<Mutex<Table>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        let table = Table { slots: HashMap::new(), last_sweep: Instant::now() };
        Self { table: Arc::new(Mutex::new(table)) }
    }

    /// Nombre d'entrées vivantes
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.table.lock().slots.values().filter(|s| s.is_live(now)).count()
    }

    /// Table verrouillée pour une écriture; les entrées expirées de toutes les
    /// clés sont purgées si le dernier balayage date de plus de `SWEEP_INTERVAL`.
    fn lock_for_write(&self, now: Instant) -> MutexGuard<'_, Table> {
        let mut table = self.table.lock();
        if now.saturating_duration_since(table.last_sweep) >= SWEEP_INTERVAL {
            table.slots.retain(|_, s| s.is_live(now));
            table.last_sweep = now;
        }
        table
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn live_value(slots: &mut HashMap<String, Slot>, key: &str, now: Instant) -> Option<String> {
        match slots.get(key) {
            Some(slot) if slot.is_live(now) => Some(slot.value.clone()),
            Some(_) => {
                slots.remove(key);
                None
            }
            None => None,
        }
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        Ok(Self::live_value(&mut self.table.lock().slots, key, now))
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError> {
        let now = Instant::now();
        let mut table = self.table.lock();
        Ok(keys.iter().map(|k| Self::live_value(&mut table.slots, k, now)).collect())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let now = Instant::now();
        let slot = Slot { value: value.to_string(), deadline: now + ttl };
        self.lock_for_write(now).slots.insert(key.to_string(), slot);
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, CacheError> {
        let now = Instant::now();
        let mut table = self.table.lock();
        let removed = keys
            .iter()
            .filter_map(|k| table.slots.remove(k))
            .filter(|s| s.is_live(now))
            .count();
        Ok(removed as u64)
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        let now = Instant::now();
        let mut table = self.table.lock();
        table.slots.retain(|_, s| s.is_live(now));
        table.last_sweep = now;
        let mut keys: Vec<String> =
            table.slots.keys().filter(|k| k.starts_with(prefix)).cloned().collect();
        keys.sort();
        Ok(keys)
    }

    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<Counter, CacheError> {
        let now = Instant::now();
        let mut table = self.lock_for_write(now);
        let slot = table
            .slots
            .entry(key.to_string())
            .or_insert_with(|| Slot { value: "0".into(), deadline: now + ttl });
        if !slot.is_live(now) {
            *slot = Slot { value: "0".into(), deadline: now + ttl };
        }

        let current: u64 = slot
            .value
            .parse()
            .map_err(|_| CacheError::Backend(format!("value at {} is not an integer", key)))?;
        let count = current + 1;
        slot.value = count.to_string();

        Ok(Counter { count, ttl: slot.deadline.saturating_duration_since(now) })
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError> {
        let now = Instant::now();
        let mut table = self.table.lock();
        match table.slots.get(key) {
            Some(slot) if slot.is_live(now) => {
                Ok(Some(slot.deadline.saturating_duration_since(now)))
            }
            Some(_) => {
                table.slots.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }
}
