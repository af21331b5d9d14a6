use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub const POWER_UNIT: &str = "Watts";

/// Une mesure de consommation pour une cible.
///
/// Soit une valeur valide (`error == None`), soit une erreur avec une
/// consommation à 0; l'unité est toujours renseignée.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerReading {
    pub server_name: String,
    pub power_consumption: f64,
    pub unit: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PowerReading {
    pub fn success(server_name: &str, watts: f64) -> Self {
        Self {
            server_name: server_name.to_string(),
            power_consumption: watts,
            unit: POWER_UNIT.to_string(),
            timestamp: OffsetDateTime::now_utc(),
            error: None,
        }
    }

    pub fn failure(server_name: &str, error: impl ToString) -> Self {
        let message = error.to_string();
        Self {
            server_name: server_name.to_string(),
            power_consumption: 0.0,
            unit: POWER_UNIT.to_string(),
            timestamp: OffsetDateTime::now_utc(),
            error: Some(if message.is_empty() { "Unknown error occurred".into() } else { message }),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
