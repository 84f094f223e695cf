/*!
# Concentrator DevKit - Stubs et utilitaires de test

Bibliothèque facilitant les tests du concentrateur avec:
- Un stub de broker MQTT 3.1.1 qui enregistre les messages publiés
- Des helpers TCP pour jouer le rôle d'une source d'alarmes
*/

pub mod mqtt_stub;
pub mod test_utils;

pub use mqtt_stub::{BrokerStub, StubMessage};
pub use test_utils::{connect_and_close, init_tracing, send_and_read, unused_local_addr};
