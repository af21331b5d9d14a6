//! Politique de retry des appels contrôleurs (valeur pure, testable seule).

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Tentatives bornées, attente linéaire `base_delay * n` après l'échec n
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay: Duration::from_millis(1000) }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self { max_attempts: max_attempts.max(1), base_delay }
    }

    /// Attente avant la tentative `attempt + 1` (attempt commence à 1)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }

    /// Exécute `op` jusqu'au succès ou épuisement; la dernière erreur est retournée.
    /// `op` reçoit le numéro de tentative (1..=max_attempts).
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, E>
    where
        E: Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= self.max_attempts => return Err(e),
                Err(e) => {
                    let delay = self.delay_after(attempt);
                    warn!(
                        server = label,
                        attempt,
                        remaining = self.max_attempts - attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying controller request"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
