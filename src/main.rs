pub mod config;
pub mod connector;
pub mod device;
pub mod document;
pub mod drivers;
pub mod error;
pub mod mqtt;
pub mod registry;
pub mod router;
#[cfg(test)]
mod testing;

use crate::config::{CliArgs, ConnectorSettings, ResolvedConfig};
use crate::connector::Connector;
use crate::mqtt::mqtt_handler::MqttHandler;
use crate::registry::DeviceRegistry;
use color_eyre::{eyre::eyre, Result};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// How long each task may take to wind down before it is stopped
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let cli = CliArgs::parse(std::env::args().skip(1));
    let env = |key: &str| std::env::var(key).ok();
    setup_logging(&cli.log_level(env));
    for arg in cli.unrecognised() {
        warn!("Ignoring unrecognised argument '{}'", arg);
    }

    let resolved = ConnectorSettings::discover(&cli, env)?.resolve(&cli, env)?;

    info!(
        "Starting connector for broker {} (config topic {})",
        resolved.mqtt.address(),
        resolved.topics.config_topic()
    );

    let shutdown = CancellationToken::new();
    // the event loop outlives the connector so its unsubscribes get flushed
    let mqtt_shutdown = CancellationToken::new();
    let (broker_tx, broker_rx) = mpsc::channel(resolved.mqtt.channel_capacity);

    let (mqtt_handler, broker) =
        MqttHandler::new(resolved.mqtt.clone(), resolved.topics.config_topic());
    let mqtt_status = mqtt_handler.subscribe();
    let mqtt_task_shutdown = mqtt_shutdown.clone();
    let mut mqtt_handle = tokio::spawn(async move {
        mqtt_handler.run(broker_tx, mqtt_task_shutdown).await;
    });

    let mut connector = build_connector(&resolved, Arc::new(broker.clone()));

    // bootstrap document is generation 1
    let report = connector.apply(resolved.bootstrap.clone()).await;
    info!("Bootstrap finished: {}", report);

    let connector_shutdown = shutdown.clone();
    let mut connector_handle = tokio::spawn(async move {
        connector.run(broker_rx, connector_shutdown).await;
    });

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| eyre!("Failed to listen for ctrl-c: {}", e))?;
    info!("Ctrl-C received, shutting down");
    shutdown.cancel();

    match tokio::time::timeout(SHUTDOWN_GRACE, &mut connector_handle).await {
        Ok(Err(e)) => warn!("Connector task ended abnormally: {}", e),
        Ok(Ok(())) => {}
        Err(_) => {
            warn!("Connector did not stop within {:?}, aborting", SHUTDOWN_GRACE);
            connector_handle.abort();
        }
    }

    // queued behind the connector's unsubscribes
    match tokio::time::timeout(SHUTDOWN_GRACE, broker.disconnect()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("MQTT disconnect failed: {}", e),
        Err(_) => warn!("MQTT request queue full, disconnect not queued"),
    }
    match tokio::time::timeout(SHUTDOWN_GRACE, &mut mqtt_handle).await {
        Ok(Err(e)) => warn!("MQTT task ended abnormally: {}", e),
        Ok(Ok(())) => {}
        Err(_) => {
            warn!("MQTT disconnect not flushed within {:?}, stopping event loop", SHUTDOWN_GRACE);
            mqtt_shutdown.cancel();
            if let Err(e) = mqtt_handle.await {
                warn!("MQTT task ended abnormally: {}", e);
            }
        }
    }

    let status = mqtt_status.borrow();
    info!(
        "MQTT session closed: {} connections, {} messages received, {} errors",
        status.connections,
        status.messages_received,
        status.error_messages.len()
    );

    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    Ok(())
}

fn setup_logging(level: &str) {
    let level = Level::from_str(level).unwrap_or(Level::INFO);
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .init();
}

fn build_connector(resolved: &ResolvedConfig, broker: Arc<dyn mqtt::broker::Broker>) -> Connector {
    let mut catalog = drivers::builtin_catalog();
    if let Some(allowed) = &resolved.drivers {
        catalog = catalog.restrict(allowed);
    }
    info!(
        "Available drivers: {}",
        catalog.classes().collect::<Vec<_>>().join(", ")
    );

    Connector::new(
        broker,
        DeviceRegistry::new(catalog),
        resolved.topics.clone(),
        resolved.connect_timeout,
    )
}
