//! Client Redfish: lecture de la ressource `Chassis/{id}/Power` d'un contrôleur.

use super::retry::RetryPolicy;
use crate::config::ControllerConf;
use crate::targets::TargetDescriptor;
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Instant;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum TargetFetchError {
    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("HTTP error: status {0}")]
    Status(StatusCode),
    #[error("invalid power payload: {0}")]
    Decode(#[source] reqwest::Error),
    #[error("Unable to read power consumption from {target}")]
    NoReading { target: String },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PowerResource {
    #[serde(default)]
    pub power_control: Option<Vec<PowerControl>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PowerControl {
    #[serde(default)]
    pub power_consumed_watts: Option<f64>,
}

impl PowerResource {
    /// Une valeur par bloc PowerControl; champ absent ou null = 0
    pub fn readings(&self) -> Vec<f64> {
        self.power_control
            .iter()
            .flatten()
            .map(|c| c.power_consumed_watts.unwrap_or(0.0))
            .collect()
    }

    /// Plus forte lecture (rail le plus chargé), `None` si rien d'exploitable
    pub fn peak_watts(&self) -> Option<f64> {
        self.readings()
            .into_iter()
            .fold(None, |acc: Option<f64>, w| Some(acc.map_or(w, |m| m.max(w))))
            .filter(|w| *w > 0.0)
    }
}

#[derive(Clone)]
pub struct RedfishClient {
    http: reqwest::Client,
    scheme: &'static str,
    retry: RetryPolicy,
}

impl RedfishClient {
    pub fn new(conf: &ControllerConf) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(conf.request_timeout())
            .danger_accept_invalid_certs(conf.accept_invalid_certs)
            .build()?;
        Ok(Self { http, scheme: "https", retry: RetryPolicy::default() })
    }

    /// Schéma des URLs contrôleurs (`http` pour les stubs de test)
    pub fn with_scheme(mut self, scheme: &'static str) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn power_url(&self, target: &TargetDescriptor) -> String {
        format!("{}://{}{}", self.scheme, target.address, target.kind.power_path())
    }

    /// Lit la consommation crête d'une cible (retries inclus)
    pub async fn read_power(&self, target: &TargetDescriptor) -> Result<f64, TargetFetchError> {
        let url = self.power_url(target);
        let (http, url_ref) = (&self.http, url.as_str());
        let started = Instant::now();

        let response = self
            .retry
            .run(&target.name, move |_| async move {
                let response = http
                    .get(url_ref)
                    .basic_auth(&target.username, Some(target.password.expose()))
                    .header(ACCEPT, "application/json")
                    .send()
                    .await
                    .map_err(TargetFetchError::Transport)?;
                if !response.status().is_success() {
                    return Err(TargetFetchError::Status(response.status()));
                }
                Ok(response)
            })
            .await?;

        let resource: PowerResource = response.json().await.map_err(TargetFetchError::Decode)?;
        debug!(
            server = %target.name,
            endpoint = %target.kind.power_path(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "controller response time"
        );

        resource
            .peak_watts()
            .ok_or_else(|| TargetFetchError::NoReading { target: target.name.clone() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Secret;
    use crate::targets::ControllerKind;
    use powerwatch_devkit::{power_body, StubController, StubReply};
    use std::time::Duration;

    fn resource(watts: &[Option<f64>]) -> PowerResource {
        serde_json::from_value(power_body(watts)).unwrap()
    }

    fn target(kind: ControllerKind, address: &str) -> TargetDescriptor {
        TargetDescriptor {
            name: "web-01".into(),
            kind,
            address: address.into(),
            username: "admin".into(),
            password: Secret::new("s3cret"),
        }
    }

    fn client() -> RedfishClient {
        RedfishClient::new(&ControllerConf::default())
            .unwrap()
            .with_scheme("http")
            .with_retry(RetryPolicy::new(2, Duration::from_millis(10)))
    }

    #[test]
    fn test_peak_is_max_of_rails() {
        assert_eq!(resource(&[Some(120.0), Some(340.0), Some(90.0)]).peak_watts(), Some(340.0));
        assert_eq!(resource(&[None, Some(75.5)]).peak_watts(), Some(75.5));
    }

    #[test]
    fn test_no_usable_reading() {
        assert_eq!(resource(&[]).peak_watts(), None);
        assert_eq!(resource(&[None, Some(0.0)]).peak_watts(), None);

        let missing: PowerResource = serde_json::from_str(r#"{"Id":"Power"}"#).unwrap();
        assert!(missing.readings().is_empty());
        assert_eq!(missing.peak_watts(), None);
    }

    #[test]
    fn test_power_url_per_kind() {
        let c = RedfishClient::new(&ControllerConf::default()).unwrap();
        assert_eq!(
            c.power_url(&target(ControllerKind::Ilo, "10.0.0.5")),
            "https://10.0.0.5/redfish/v1/Chassis/1/Power"
        );
        assert_eq!(
            c.power_url(&target(ControllerKind::Idrac, "10.0.0.6")),
            "https://10.0.0.6/redfish/v1/Chassis/System.Embedded.1/Power"
        );
    }

    #[tokio::test]
    async fn test_read_power_sends_basic_auth() {
        let stub = StubController::spawn(vec![StubReply::watts(&[210.0])]).await.unwrap();
        let watts = client()
            .read_power(&target(ControllerKind::Idrac, &stub.address()))
            .await
            .unwrap();

        assert_eq!(watts, 210.0);
        assert_eq!(stub.paths(), vec!["/redfish/v1/Chassis/System.Embedded.1/Power"]);
        // base64("admin:s3cret")
        assert_eq!(stub.authorizations(), vec!["Basic YWRtaW46czNjcmV0"]);
    }

    #[tokio::test]
    async fn test_status_error_after_retries() {
        let stub = StubController::spawn(vec![StubReply::Status(503)]).await.unwrap();
        let err = client()
            .read_power(&target(ControllerKind::Ilo, &stub.address()))
            .await
            .unwrap_err();

        assert!(matches!(err, TargetFetchError::Status(s) if s == StatusCode::SERVICE_UNAVAILABLE));
        assert_eq!(stub.hits(), 2);
    }

    #[tokio::test]
    async fn test_recovers_on_retry() {
        let stub = StubController::spawn(vec![StubReply::Status(500), StubReply::watts(&[99.0])])
            .await
            .unwrap();
        let watts = client()
            .read_power(&target(ControllerKind::Ilo, &stub.address()))
            .await
            .unwrap();
        assert_eq!(watts, 99.0);
        assert_eq!(stub.hits(), 2);
    }

    #[tokio::test]
    async fn test_garbage_body_is_decode_error_without_retry() {
        let garbage = StubReply::Body(serde_json::json!({"PowerControl": "oops"}));
        let stub = StubController::spawn(vec![garbage]).await.unwrap();
        let err = client()
            .read_power(&target(ControllerKind::Ilo, &stub.address()))
            .await
            .unwrap_err();
        assert!(matches!(err, TargetFetchError::Decode(_)));
        assert_eq!(stub.hits(), 1);
    }
}
