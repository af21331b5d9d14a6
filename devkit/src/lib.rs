/*!
# PowerWatch DevKit - Stubs et Utilitaires pour les tests

Bibliothèque facilitant les tests du kernel PowerWatch sans matériel:
- Stub HTTP d'un contrôleur Redfish (iLO / iDRAC) scriptable
- Fixtures JSON (corps Power, fichiers de cibles)
*/

pub mod fixtures;
pub mod redfish_stub;

pub use fixtures::{init_test_logging, power_body, target_record, write_targets_file};
pub use redfish_stub::{StubController, StubReply};
