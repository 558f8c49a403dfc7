//! refarm-bridge: MQTT to Modbus TCP bridge
//!
//! Messages received under a subscription filter are mapped, by exact topic, to holding
//! register writes on a Modbus TCP gateway. A heartbeat probe keeps the gateway link warm while
//! no traffic arrives. Everything runs on one control loop; see [`core::dispatch`].

pub mod api;
pub mod cli;
pub mod core;
pub mod logging;
#[doc(hidden)]
pub mod protocol;

pub use logging::{init_logger, LOG_FILE_ENV};

use crate::{
    api::gateway::GatewayConnection,
    cli::BridgeConfig,
    core::{install_signal_handlers, Dispatcher, MqttBus},
};

/// Wire the bridge together and run it until SIGINT/SIGTERM.
///
/// Returns the bus transport's final loop status code.
pub async fn start_bridge(config: BridgeConfig) -> anyhow::Result<u8> {
    log::info!("refarm-bridge {} starting", env!("CARGO_PKG_VERSION"));

    let shutdown = install_signal_handlers()?;
    let bus = MqttBus::start(&config.broker_config());
    let gateway = GatewayConnection::new(config.gateway_config());

    for mapping in &config.mappings {
        log::info!(
            "Mapping topic '{}' to register {}",
            mapping.topic,
            mapping.register
        );
    }

    let mut dispatcher = Dispatcher::new(bus, gateway, shutdown)
        .with_translator(config.translator())
        .with_heartbeat(config.heartbeat_supervisor())
        .with_policy(config.dispatch_policy());

    let status = dispatcher.run().await;
    log::info!("refarm-bridge exiting with status {status}");
    Ok(status)
}
