pub mod config;

use anyhow::Result;
use clap::{Arg, ArgMatches, Command};
use std::path::Path;

use crate::core::ConnectionPersistence;
pub use config::BridgeConfig;

/// Build the command line interface.
pub fn command() -> Command {
    Command::new("refarm-bridge")
        .about("Drive Modbus TCP holding registers from MQTT topics")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .help("Configuration file (.toml or .json); built-in defaults when omitted")
                .value_name("FILE"),
        )
        .arg(
            Arg::new("broker-host")
                .long("broker-host")
                .help("MQTT broker host")
                .value_name("HOST"),
        )
        .arg(
            Arg::new("broker-port")
                .long("broker-port")
                .help("MQTT broker port")
                .value_name("PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("gateway-host")
                .long("gateway-host")
                .help("Modbus TCP gateway host")
                .value_name("HOST"),
        )
        .arg(
            Arg::new("gateway-port")
                .long("gateway-port")
                .help("Modbus TCP gateway port")
                .value_name("PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("unit-id")
                .long("unit-id")
                .help("Modbus unit (slave) id of the gateway")
                .value_name("ID")
                .value_parser(clap::value_parser!(u8)),
        )
        .arg(
            Arg::new("no-heartbeat")
                .long("no-heartbeat")
                .help("Disable the periodic gateway probe")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("per-command")
                .long("per-command")
                .help("Close the gateway connection after every write")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("log-file")
                .long("log-file")
                .help("Also append log records to FILE (or set REFARM_BRIDGE_LOG_FILE)")
                .value_name("FILE"),
        )
        .arg(
            Arg::new("print-config")
                .long("print-config")
                .help("Print the effective configuration as TOML and exit")
                .action(clap::ArgAction::SetTrue),
        )
}

/// Parse command line arguments and return ArgMatches.
pub fn parse_args() -> ArgMatches {
    command().get_matches()
}

/// Load the configuration file (if any), apply command line overrides and validate.
pub fn load_config(matches: &ArgMatches) -> Result<BridgeConfig> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => {
            log::info!("Loading configuration from {path}");
            BridgeConfig::from_file(Path::new(path))?
        }
        None => BridgeConfig::default(),
    };
    apply_overrides(&mut config, matches);
    config.validate()?;
    Ok(config)
}

/// Command line values win over the configuration file.
pub fn apply_overrides(config: &mut BridgeConfig, matches: &ArgMatches) {
    if let Some(host) = matches.get_one::<String>("broker-host") {
        config.broker.host = host.clone();
    }
    if let Some(port) = matches.get_one::<u16>("broker-port") {
        config.broker.port = *port;
    }
    if let Some(host) = matches.get_one::<String>("gateway-host") {
        config.gateway.host = host.clone();
    }
    if let Some(port) = matches.get_one::<u16>("gateway-port") {
        config.gateway.port = *port;
    }
    if let Some(unit_id) = matches.get_one::<u8>("unit-id") {
        config.gateway.unit_id = *unit_id;
    }
    if matches.get_flag("no-heartbeat") {
        config.heartbeat.enabled = false;
    }
    if matches.get_flag("per-command") {
        config.gateway.persistence = ConnectionPersistence::PerCommand;
    }
}
