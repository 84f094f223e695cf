/*!
# Alarm Concentrator - Pont TCP/CSV vers MQTT

Reçoit un enregistrement CSV par connexion TCP, le convertit en document JSON
et le publie sur `topic/alarmConcentrator` :
- `record` : décodage CSV en `AlarmRecord`
- `document` : encodage JSON et retrait des `\u0000`
- `bus` : publication MQTT, une connexion broker par message
- `handler` / `listener` : cycle de vie des connexions et boucle d'acceptation
*/

pub mod bus;
pub mod config;
pub mod document;
pub mod handler;
pub mod listener;
pub mod logging;
pub mod record;

pub use bus::{BusConfig, MqttPublisher, PublishError, Publisher};
pub use config::AppConfig;
pub use handler::{handle_connection, HandlerError, HandlerSettings, Outcome, ALARM_TOPIC};
pub use record::AlarmRecord;
