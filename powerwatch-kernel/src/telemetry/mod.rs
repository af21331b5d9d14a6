/**
 * ACQUISITION TÉLÉMÉTRIE - Pipeline de lecture de puissance des contrôleurs
 *
 * RÔLE :
 * Produire une mesure par cible, dans l'ordre du registre, sans qu'une cible
 * lente ou en panne ne fasse échouer (ni ne bloque) le lot.
 *
 * FONCTIONNEMENT :
 * - fetch_one : cache-aside (hit = aucun appel réseau), sinon appel Redfish avec
 *   retries; succès écrit en cache, échec converti en mesure d'erreur (jamais cachée)
 * - fetch_all : une tâche tokio par cible, puis barrière sur toutes les tâches
 * - Les erreurs ne traversent jamais la frontière du fan-out : ce sont des données
 */

pub mod redfish;
pub mod retry;

pub use redfish::{RedfishClient, TargetFetchError};
pub use retry::RetryPolicy;

use crate::cache::Cache;
use crate::models::PowerReading;
use crate::targets::{TargetDescriptor, TargetRegistry};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

#[derive(Clone)]
pub struct PowerMonitor {
    registry: Arc<TargetRegistry>,
    cache: Cache,
    client: RedfishClient,
}

impl PowerMonitor {
    pub fn new(registry: Arc<TargetRegistry>, cache: Cache, client: RedfishClient) -> Self {
        Self { registry, cache, client }
    }

    pub fn registry(&self) -> &TargetRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Mesure d'une cible: cache d'abord, contrôleur ensuite
    pub async fn fetch_one(&self, target: &TargetDescriptor) -> PowerReading {
        if let Some(cached) = self.cache.get(&target.name).await.into_value() {
            return cached;
        }

        match self.client.read_power(target).await {
            Ok(watts) => {
                let reading = PowerReading::success(&target.name, watts);
                // best-effort, déjà loggé en cas de dégradation
                let _ = self.cache.set(&reading).await;
                reading
            }
            Err(e) => {
                error!(
                    server = %target.name,
                    address = %target.address,
                    error = %e,
                    "power fetch failed"
                );
                PowerReading::failure(&target.name, e)
            }
        }
    }

    /// Mesures de toutes les `targets`, dans le même ordre
    pub async fn fetch_all(&self, targets: &[TargetDescriptor]) -> Vec<PowerReading> {
        let started = Instant::now();
        info!(total = targets.len(), "starting power fetch");

        let handles: Vec<_> = targets
            .iter()
            .cloned()
            .map(|target| {
                let monitor = self.clone();
                tokio::spawn(async move { monitor.fetch_one(&target).await })
            })
            .collect();

        let readings: Vec<PowerReading> = join_all(handles)
            .await
            .into_iter()
            .zip(targets)
            .map(|(joined, target)| {
                joined.unwrap_or_else(|e| {
                    error!(server = %target.name, error = %e, "power fetch task aborted");
                    PowerReading::failure(&target.name, "Unknown error occurred")
                })
            })
            .collect();

        let failed = readings.iter().filter(|r| r.is_error()).count();
        info!(
            total = readings.len(),
            succeeded = readings.len() - failed,
            failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "completed power fetch"
        );
        readings
    }

    /// Lot complet sur le registre
    pub async fn fetch_registry(&self) -> Vec<PowerReading> {
        self.fetch_all(self.registry.targets()).await
    }
}
