//! Vérification de la clé d'API partagée (`x-api-key`).

use super::GateRejection;
use crate::config::Secret;
use axum::http::HeaderMap;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Compare la clé fournie au secret configuré
pub fn verify(expected: Option<&Secret>, headers: &HeaderMap) -> Result<(), GateRejection> {
    let expected = expected.filter(|s| !s.is_empty()).ok_or(GateRejection::Misconfigured)?;

    let provided = headers
        .get(API_KEY_HEADER)
        .map(|v| v.as_bytes())
        .filter(|v| !v.is_empty())
        .ok_or(GateRejection::MissingKey)?;

    if constant_time_eq(expected.expose().as_bytes(), provided) {
        Ok(())
    } else {
        Err(GateRejection::InvalidKey)
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
