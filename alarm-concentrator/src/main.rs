/**
 * ALARM CONCENTRATOR - Point d'entrée principal
 *
 * RÔLE : Charge la config, installe le logging, écoute en TCP et publie
 * chaque enregistrement CSV reçu sur MQTT (topic/alarmConcentrator).
 *
 * ARCHITECTURE : une task tokio par connexion, une connexion MQTT par message.
 */

use alarm_concentrator::{listener, logging, AppConfig, MqttPublisher, Publisher};
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "alarm-concentrator", version, about = "TCP/CSV to MQTT alarm bridge")]
struct Args {
    /// Sets log level to debug
    #[arg(long)]
    debug: bool,

    /// YAML config file (defaults to $ALARM_CONCENTRATOR_CONFIG or concentrator.yaml)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let cfg = AppConfig::load(args.config.as_deref()).context("cannot load config")?;
    logging::init(args.debug, &cfg.environment);

    info!(environment = %cfg.environment, "Starting alarm concentrator");

    let publisher: Arc<dyn Publisher> = Arc::new(MqttPublisher::new(cfg.bus()));
    let listener = listener::bind(cfg.listen.port)
        .await
        .with_context(|| format!("cannot create listener on port {}", cfg.listen.port))?;

    info!(
        port = cfg.listen.port,
        broker = %format!("{}:{}", cfg.mqtt.host, cfg.mqtt.port),
        client_id = %cfg.mqtt.client_id,
        "listening"
    );

    listener::serve(listener, publisher, Arc::new(cfg.handler_settings()), shutdown_signal())
        .await
        .context("listener failed")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for ctrl-c, running until killed");
        std::future::pending::<()>().await;
    }
}
