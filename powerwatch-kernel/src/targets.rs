/**
 * REGISTRE DES CIBLES - Contrôleurs iLO / iDRAC surveillés
 *
 * RÔLE :
 * Charge une fois au démarrage la liste des contrôleurs de management
 * (nom, type, adresse, identifiants) et la garde immuable pour toute la vie du process.
 *
 * SOURCES (une seule, par priorité) :
 * 1. fichier JSON/YAML pointé par TARGETS_PATH (ou l'ancien SERVER_CONFIGS_PATH)
 * 2. groupes TARGET_<i>_NAME / _TYPE / _ADDRESS / _USER / _SECRET, i = 1, 2, ...
 *
 * Une seule cible invalide fait échouer tout le chargement; une liste vide aussi.
 */

use crate::config::{ConfigError, EnvSource, Secret};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Racine de l'API Redfish
pub const API_ROOT: &str = "/redfish/v1";

/// Variante de contrôleur; chacune expose la télémétrie sous un chassis différent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ControllerKind {
    #[serde(rename = "iLO")]
    Ilo,
    #[serde(rename = "iDRAC")]
    Idrac,
}

impl ControllerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ControllerKind::Ilo => "iLO",
            ControllerKind::Idrac => "iDRAC",
        }
    }

    pub fn chassis_id(self) -> &'static str {
        match self {
            ControllerKind::Ilo => "1",
            ControllerKind::Idrac => "System.Embedded.1",
        }
    }

    /// Chemin de la ressource Power sous la racine Redfish
    pub fn power_path(self) -> String {
        format!("{}/Chassis/{}/Power", API_ROOT, self.chassis_id())
    }
}

impl FromStr for ControllerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("ilo") {
            Ok(ControllerKind::Ilo)
        } else if s.eq_ignore_ascii_case("idrac") {
            Ok(ControllerKind::Idrac)
        } else {
            Err(format!("unsupported controller type {:?} (expected iLO or iDRAC)", s))
        }
    }
}

impl fmt::Display for ControllerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Descripteur validé d'un contrôleur
#[derive(Debug, Clone)]
pub struct TargetDescriptor {
    pub name: String,
    pub kind: ControllerKind,
    pub address: String,
    pub username: String,
    pub password: Secret,
}

/// Vue publique d'une cible (sans identifiants)
#[derive(Debug, Serialize)]
pub struct TargetView {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ControllerKind,
    pub address: String,
}

impl From<&TargetDescriptor> for TargetView {
    fn from(t: &TargetDescriptor) -> Self {
        Self { name: t.name.clone(), kind: t.kind, address: t.address.clone() }
    }
}

/// Enregistrement brut tel que lu (fichier ou env), avant validation
#[derive(Debug, Default, Deserialize)]
struct RawTarget {
    name: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(alias = "ip")]
    address: Option<String>,
    #[serde(alias = "user")]
    username: Option<String>,
    #[serde(alias = "secret")]
    password: Option<String>,
}

fn required(value: Option<String>, field: &str, label: &str) -> Result<String, ConfigError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConfigError::InvalidTarget {
            target: label.to_string(),
            reason: format!("missing {}", field),
        })
}

impl RawTarget {
    fn validate(self, label: &str) -> Result<TargetDescriptor, ConfigError> {
        let name = required(self.name, "name", label)?;
        let kind_raw = required(self.kind, "type", &name)?;
        let kind = kind_raw
            .parse::<ControllerKind>()
            .map_err(|reason| ConfigError::InvalidTarget { target: name.clone(), reason })?;
        let address = required(self.address, "address", &name)?;
        let username = required(self.username, "username", &name)?;
        // le mot de passe n'est pas trimé: des espaces peuvent en faire partie
        let password = self
            .password
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ConfigError::InvalidTarget {
                target: name.clone(),
                reason: "missing password".into(),
            })?;

        Ok(TargetDescriptor { name, kind, address, username, password: Secret::new(password) })
    }
}

/// Liste immuable des cibles configurées
#[derive(Debug, Clone)]
pub struct TargetRegistry {
    targets: Vec<TargetDescriptor>,
}

impl TargetRegistry {
    /// Construit un registre: non vide, noms uniques
    pub fn new(targets: Vec<TargetDescriptor>) -> Result<Self, ConfigError> {
        if targets.is_empty() {
            return Err(ConfigError::NoTargets);
        }
        let mut seen = HashSet::new();
        for t in &targets {
            if !seen.insert(t.name.as_str()) {
                return Err(ConfigError::InvalidTarget {
                    target: t.name.clone(),
                    reason: "duplicate name".into(),
                });
            }
        }
        Ok(Self { targets })
    }

    /// Charge depuis le fichier pointé par l'env, sinon depuis les groupes TARGET_<i>_*
    pub fn load(env: &impl EnvSource) -> Result<Self, ConfigError> {
        match env.var("TARGETS_PATH").or_else(|| env.var("SERVER_CONFIGS_PATH")) {
            Some(path) => Self::from_file(Path::new(&path)),
            None => Self::from_env(env),
        }
    }

    /// Liste de descripteurs en JSON ou YAML
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let txt = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: Vec<RawTarget> = serde_yaml::from_str(&txt).map_err(|source| ConfigError::Parse {
            path: PathBuf::from(path),
            source,
        })?;

        let targets = raw
            .into_iter()
            .enumerate()
            .map(|(i, r)| r.validate(&format!("at index {}", i)))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::info!(path = %path.display(), count = targets.len(), "loaded targets from file");
        Self::new(targets)
    }

    /// Scanne TARGET_1_*, TARGET_2_*, ... jusqu'au premier NAME absent
    pub fn from_env(env: &impl EnvSource) -> Result<Self, ConfigError> {
        let mut targets = Vec::new();
        for index in 1.. {
            let Some(name) = env.var(&format!("TARGET_{}_NAME", index)) else { break };
            let raw = RawTarget {
                name: Some(name),
                kind: env.var(&format!("TARGET_{}_TYPE", index)),
                address: env.var(&format!("TARGET_{}_ADDRESS", index)),
                username: env.var(&format!("TARGET_{}_USER", index)),
                password: env.var(&format!("TARGET_{}_SECRET", index)),
            };
            targets.push(raw.validate(&format!("TARGET_{}", index))?);
        }

        if targets.is_empty() {
            tracing::error!("no target configuration found in environment");
        }
        Self::new(targets)
    }

    pub fn targets(&self) -> &[TargetDescriptor] {
        &self.targets
    }

    pub fn get(&self, name: &str) -> Option<&TargetDescriptor> {
        self.targets.iter().find(|t| t.name == name)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn views(&self) -> Vec<TargetView> {
        self.targets.iter().map(TargetView::from).collect()
    }
}
