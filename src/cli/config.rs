use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, path::Path, time::Duration};

use crate::{
    api::gateway::{validate_unit_id, GatewayConfig},
    core::{
        BrokerConfig, CommandTranslator, ConnectionPersistence, DispatchPolicy, HeartbeatProbe,
        HeartbeatSupervisor, TopicMapping,
    },
    protocol::modbus::MAX_READ_COUNT,
};

/// MQTT broker section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSection {
    pub host: String,
    pub port: u16,
    /// Defaults to `mqtt_modbus_<pid>` when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    pub keep_alive_secs: u64,
    /// Subscription filter; wildcards allowed
    pub subscription: String,
    /// Pause before reconnecting after a transport error
    pub reconnect_backoff_secs: u64,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: None,
            keep_alive_secs: 60,
            subscription: "refarm/shop/#".to_string(),
            reconnect_backoff_secs: 10,
        }
    }
}

/// Modbus TCP gateway section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySection {
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
    pub connect_timeout_ms: u64,
    pub io_timeout_ms: u64,
    pub persistence: ConnectionPersistence,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            host: "192.168.32.60".to_string(),
            port: 502,
            unit_id: 40,
            connect_timeout_ms: 3000,
            io_timeout_ms: 1000,
            persistence: ConnectionPersistence::Persistent,
        }
    }
}

/// Heartbeat section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatSection {
    pub enabled: bool,
    pub interval_secs: u64,
    pub probe_address: u16,
    pub probe_count: u16,
}

impl Default for HeartbeatSection {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 10,
            probe_address: 0,
            probe_count: 2,
        }
    }
}

fn default_mappings() -> Vec<TopicMapping> {
    vec![TopicMapping::new("refarm/shop/exteriorLightSouth", 0)]
}

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub broker: BrokerSection,
    pub gateway: GatewaySection,
    pub heartbeat: HeartbeatSection,
    pub mappings: Vec<TopicMapping>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            broker: BrokerSection::default(),
            gateway: GatewaySection::default(),
            heartbeat: HeartbeatSection::default(),
            mappings: default_mappings(),
        }
    }
}

impl BridgeConfig {
    /// Parse configuration from a JSON string
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str).context("Invalid JSON configuration")
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).context("Invalid TOML configuration")
    }

    /// Read configuration from a file; `.json` files are JSON, everything else TOML
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let config = if is_json {
            Self::from_json(&content)
        } else {
            Self::from_toml(&content)
        };
        config.with_context(|| format!("Failed to load {}", path.display()))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject configurations the bridge cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.mappings.is_empty() {
            return Err(anyhow!("At least one topic mapping is required"));
        }
        let mut seen = HashSet::new();
        for mapping in &self.mappings {
            if mapping.topic.is_empty() {
                return Err(anyhow!("Mapping topics must not be empty"));
            }
            if mapping.topic.contains(['#', '+']) {
                return Err(anyhow!(
                    "Mapping topic '{}' contains a wildcard; mappings match exact topics",
                    mapping.topic
                ));
            }
            if !seen.insert(mapping.topic.as_str()) {
                return Err(anyhow!("Duplicate mapping for topic '{}'", mapping.topic));
            }
        }
        if self.broker.subscription.is_empty() {
            return Err(anyhow!("Broker subscription filter must not be empty"));
        }
        validate_unit_id(self.gateway.unit_id).map_err(|reason| anyhow!(reason))?;
        if self.gateway.connect_timeout_ms == 0 || self.gateway.io_timeout_ms == 0 {
            return Err(anyhow!("Gateway timeouts must be greater than zero"));
        }
        if self.heartbeat.interval_secs == 0 {
            return Err(anyhow!("Heartbeat interval must be greater than zero"));
        }
        if self.heartbeat.probe_count == 0 || self.heartbeat.probe_count > MAX_READ_COUNT {
            return Err(anyhow!(
                "Heartbeat probe count must be within 1..={MAX_READ_COUNT}"
            ));
        }
        Ok(())
    }

    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            host: self.broker.host.clone(),
            port: self.broker.port,
            client_id: self
                .broker
                .client_id
                .clone()
                .unwrap_or_else(BrokerConfig::default_client_id),
            keep_alive: Duration::from_secs(self.broker.keep_alive_secs),
            subscription: self.broker.subscription.clone(),
        }
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            connect_timeout: Duration::from_millis(self.gateway.connect_timeout_ms),
            io_timeout: Duration::from_millis(self.gateway.io_timeout_ms),
            ..GatewayConfig::new(
                self.gateway.host.clone(),
                self.gateway.port,
                self.gateway.unit_id,
            )
        }
    }

    pub fn dispatch_policy(&self) -> DispatchPolicy {
        DispatchPolicy {
            heartbeat_enabled: self.heartbeat.enabled,
            persistence: self.gateway.persistence,
            reconnect_backoff: Duration::from_secs(self.broker.reconnect_backoff_secs),
        }
    }

    pub fn heartbeat_supervisor(&self) -> HeartbeatSupervisor {
        HeartbeatSupervisor::new(
            Duration::from_secs(self.heartbeat.interval_secs),
            HeartbeatProbe {
                address: self.heartbeat.probe_address,
                count: self.heartbeat.probe_count,
            },
        )
    }

    pub fn translator(&self) -> CommandTranslator {
        CommandTranslator::new(self.mappings.clone())
    }
}
