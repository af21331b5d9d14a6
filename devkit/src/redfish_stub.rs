/*!
Stub de contrôleur Redfish (iLO / iDRAC) pour tests sans matériel

Démarre un vrai serveur HTTP local (axum, port éphémère) qui répond sur
`/redfish/v1/Chassis/{id}/Power` selon un script de réponses.

- Chaque requête consomme la réponse suivante du script, la dernière est rejouée ensuite
- Compte les hits, garde les chemins et en-têtes `Authorization` reçus (assertions de tests)
- Le serveur est arrêté quand le `StubController` est droppé
*/

use crate::fixtures::power_body;
use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Une réponse scriptée du contrôleur simulé
#[derive(Debug, Clone)]
pub enum StubReply {
    /// 200 + blocs PowerControl (None = champ PowerConsumedWatts à null)
    Watts(Vec<Option<f64>>),
    /// Statut HTTP nu, sans corps
    Status(u16),
    /// 200 + corps JSON arbitraire
    Body(Value),
    /// Comme `Watts`, mais après une attente (cible lente)
    Slow { delay: Duration, watts: Vec<Option<f64>> },
}

impl StubReply {
    /// Raccourci pour des lectures toutes renseignées
    pub fn watts(values: &[f64]) -> Self {
        StubReply::Watts(values.iter().copied().map(Some).collect())
    }
}

#[derive(Default)]
struct StubState {
    script: Mutex<Vec<StubReply>>,
    cursor: AtomicUsize,
    hits: AtomicUsize,
    paths: Mutex<Vec<String>>,
    authorizations: Mutex<Vec<String>>,
}

/// Contrôleur simulé; `address()` s'utilise comme adresse de cible
pub struct StubController {
    addr: SocketAddr,
    state: Arc<StubState>,
    server: JoinHandle<()>,
}

impl StubController {
    /// Démarre un stub sur 127.0.0.1 avec le script donné
    pub async fn spawn(script: Vec<StubReply>) -> Result<Self> {
        let state = Arc::new(StubState {
            script: Mutex::new(script),
            ..StubState::default()
        });

        let app = Router::new()
            .route("/redfish/v1/Chassis/{chassis}/Power", get(power))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!(error = %e, "[stub] server stopped");
            }
        });

        tracing::info!(%addr, "🔌 [STUB] Redfish controller listening");
        Ok(Self { addr, state, server })
    }

    /// Adresse `host:port` à mettre dans le descripteur de cible
    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    /// Nombre total de requêtes reçues
    pub fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }

    /// Remplace le script et repart de la première réponse
    pub fn set_script(&self, script: Vec<StubReply>) {
        *self.state.script.lock().unwrap_or_else(|e| e.into_inner()) = script;
        self.state.cursor.store(0, Ordering::SeqCst);
    }

    /// Chemins demandés, dans l'ordre d'arrivée
    pub fn paths(&self) -> Vec<String> {
        self.state.paths.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Valeurs brutes des en-têtes `Authorization` reçus
    pub fn authorizations(&self) -> Vec<String> {
        self.state.authorizations.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Drop for StubController {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn power(
    State(state): State<Arc<StubState>>,
    Path(chassis): Path<String>,
    headers: HeaderMap,
) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    state
        .paths
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .push(format!("/redfish/v1/Chassis/{}/Power", chassis));
    if let Some(auth) = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        state.authorizations.lock().unwrap_or_else(|e| e.into_inner()).push(auth.to_string());
    }

    let reply = {
        let script = state.script.lock().unwrap_or_else(|e| e.into_inner());
        let index = state.cursor.fetch_add(1, Ordering::SeqCst);
        match script.len() {
            0 => None,
            len => Some(script[index.min(len - 1)].clone()),
        }
    };

    match reply {
        None => StatusCode::NOT_FOUND.into_response(),
        Some(StubReply::Watts(watts)) => Json(power_body(&watts)).into_response(),
        Some(StubReply::Status(code)) => StatusCode::from_u16(code)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            .into_response(),
        Some(StubReply::Body(body)) => Json(body).into_response(),
        Some(StubReply::Slow { delay, watts }) => {
            tokio::time::sleep(delay).await;
            Json(power_body(&watts)).into_response()
        }
    }
}
