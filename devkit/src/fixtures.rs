/*!
Fixtures JSON pour les tests PowerWatch

- Corps Redfish `Power` (blocs PowerControl)
- Fichiers de cibles (liste JSON de descripteurs)
*/

use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Corps d'une ressource Redfish Power, un bloc PowerControl par valeur
pub fn power_body(watts: &[Option<f64>]) -> Value {
    let controls: Vec<Value> = watts
        .iter()
        .enumerate()
        .map(|(i, w)| {
            json!({
                "@odata.id": format!("/redfish/v1/Chassis/1/Power#/PowerControl/{}", i),
                "MemberId": i.to_string(),
                "PowerConsumedWatts": w,
            })
        })
        .collect();

    json!({
        "@odata.id": "/redfish/v1/Chassis/1/Power",
        "@odata.type": "#Power.v1_5_0.Power",
        "Id": "Power",
        "Name": "Power",
        "PowerControl": controls,
    })
}

/// Un descripteur de cible tel qu'écrit dans un fichier de configuration
pub fn target_record(name: &str, kind: &str, address: &str) -> Value {
    json!({
        "name": name,
        "type": kind,
        "ip": address,
        "username": "admin",
        "password": "changeme",
    })
}

/// Écrit `records` en JSON dans `dir/servers.json` et retourne le chemin
pub fn write_targets_file(dir: &Path, records: &[Value]) -> std::io::Result<PathBuf> {
    let path = dir.join("servers.json");
    let content = serde_json::to_string_pretty(records)?;
    std::fs::write(&path, content)?;
    Ok(path)
}

/// Init logging pour tests (idempotent). Les événements `tracing` du kernel
/// passent par le writer de test et ne s'affichent que pour un test en échec.
/// `RUST_LOG` surcharge le filtre par défaut.
pub fn init_test_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("powerwatch_kernel=debug,powerwatch_devkit=info,warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init().ok();
}
