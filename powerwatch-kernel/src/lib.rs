//! PowerWatch kernel: télémétrie de puissance des contrôleurs iLO / iDRAC (Redfish),
//! cache des mesures et API protégée.

pub mod cache;
pub mod config;
pub mod error;
pub mod gate;
pub mod health;
pub mod http;
pub mod models;
pub mod targets;
pub mod telemetry;
