//! The single control loop of the bridge.
//!
//! Bus messages, heartbeat expiry and termination requests are merged into one
//! `tokio::select!` and handled strictly one at a time on the calling task. The gateway is
//! only ever touched from inside a handler, so it needs no synchronization.
use serde::{Deserialize, Serialize};
use std::time::Duration;
use strum::{Display, EnumString};

use super::{
    bus::{BusError, BusEvent, BusMessage, EventBus, STATUS_SUCCESS},
    heartbeat::{HeartbeatProbe, HeartbeatSupervisor},
    signals::ShutdownSignal,
    translator::{Command, CommandTranslator},
};
use crate::api::gateway::FieldbusGateway;

/// Fixed pause between a bus transport error and the reconnect request.
pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_secs(10);

/// Default heartbeat period.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Whether the gateway connection outlives a single command.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionPersistence {
    /// Close the connection after every write attempt.
    PerCommand,
    /// Keep the connection open; the heartbeat keeps it warm.
    #[default]
    Persistent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchPolicy {
    pub heartbeat_enabled: bool,
    pub persistence: ConnectionPersistence,
    pub reconnect_backoff: Duration,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            heartbeat_enabled: true,
            persistence: ConnectionPersistence::Persistent,
            reconnect_backoff: DEFAULT_RECONNECT_BACKOFF,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum LoopState {
    Running,
    Stopping,
}

/// Result of handling one bus message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// No mapping for the topic; nothing was sent.
    Ignored,
    /// The command reached the gateway.
    Written(Command),
    /// The gateway could not be connected; the command was dropped.
    ConnectFailed(Command),
    /// The write itself failed; the command was dropped.
    WriteFailed(Command),
}

enum Wakeup {
    Terminate,
    HeartbeatExpired,
    Bus(Result<BusEvent, BusError>),
}

pub struct Dispatcher<B, G> {
    bus: B,
    gateway: G,
    translator: CommandTranslator,
    heartbeat: HeartbeatSupervisor,
    policy: DispatchPolicy,
    shutdown: ShutdownSignal,
    state: LoopState,
    last_status: u8,
}

impl<B, G> Dispatcher<B, G>
where
    B: EventBus,
    G: FieldbusGateway,
{
    pub fn new(bus: B, gateway: G, shutdown: ShutdownSignal) -> Self {
        Self {
            bus,
            gateway,
            translator: CommandTranslator::default(),
            heartbeat: HeartbeatSupervisor::new(
                DEFAULT_HEARTBEAT_INTERVAL,
                HeartbeatProbe::default(),
            ),
            policy: DispatchPolicy::default(),
            shutdown,
            state: LoopState::Running,
            last_status: STATUS_SUCCESS,
        }
    }

    pub fn with_translator(mut self, translator: CommandTranslator) -> Self {
        self.translator = translator;
        self
    }

    pub fn with_heartbeat(mut self, heartbeat: HeartbeatSupervisor) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn with_policy(mut self, policy: DispatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn heartbeat(&self) -> &HeartbeatSupervisor {
        &self.heartbeat
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Status code of the most recent bus poll. A reconnect counts as a successful poll.
    pub fn last_status(&self) -> u8 {
        self.last_status
    }

    /// Run until termination is requested, then close the gateway and return the bus
    /// transport's last status code.
    pub async fn run(&mut self) -> u8 {
        log::info!(
            "Dispatcher running (heartbeat: {}, persistence: {})",
            if self.policy.heartbeat_enabled {
                "enabled"
            } else {
                "disabled"
            },
            self.policy.persistence
        );

        while self.state == LoopState::Running {
            let wakeup = tokio::select! {
                biased;
                _ = self.shutdown.requested() => Wakeup::Terminate,
                _ = self.heartbeat.expired() => Wakeup::HeartbeatExpired,
                polled = self.bus.next_event() => Wakeup::Bus(polled),
            };

            match wakeup {
                Wakeup::Terminate => {
                    log::info!("Termination requested");
                    self.state = LoopState::Stopping;
                }
                Wakeup::HeartbeatExpired => {
                    self.heartbeat.on_timer_expired(&mut self.gateway).await;
                }
                Wakeup::Bus(Ok(BusEvent::Connected)) => {
                    log::info!("Bus session established");
                    self.last_status = STATUS_SUCCESS;
                }
                Wakeup::Bus(Ok(BusEvent::Message(message))) => {
                    self.last_status = STATUS_SUCCESS;
                    self.handle_message(message).await;
                }
                Wakeup::Bus(Err(err)) => {
                    self.last_status = err.status_code();
                    self.recover_bus(err).await;
                }
            }
        }

        self.stop().await;
        self.last_status
    }

    /// Translate one message and apply the resulting command, if any.
    pub async fn handle_message(&mut self, message: BusMessage) -> MessageOutcome {
        log::info!(
            "Got message '{}' for topic '{}'",
            String::from_utf8_lossy(&message.payload),
            message.topic
        );

        if self.policy.heartbeat_enabled {
            self.heartbeat.on_message_received();
        }

        let Some(command) = self.translator.translate(&message.topic, &message.payload) else {
            log::debug!("No mapping for topic '{}'", message.topic);
            return MessageOutcome::Ignored;
        };

        log::info!(
            "Topic '{}' drives register {} -> {}",
            message.topic,
            command.register,
            command.value
        );

        if let Err(err) = self.gateway.ensure_connected().await {
            log::error!("Dropping command for register {}: {err}", command.register);
            return MessageOutcome::ConnectFailed(command);
        }

        let outcome = match self
            .gateway
            .write_register(command.register, command.value)
            .await
        {
            Ok(()) => MessageOutcome::Written(command),
            Err(err) => {
                log::error!("Dropping command for register {}: {err}", command.register);
                MessageOutcome::WriteFailed(command)
            }
        };

        if self.policy.persistence == ConnectionPersistence::PerCommand {
            self.gateway.close().await;
        }

        outcome
    }

    /// Wait out the backoff (unless termination arrives first) and ask the bus to reconnect.
    async fn recover_bus(&mut self, err: BusError) {
        let backoff = self.policy.reconnect_backoff;
        log::error!("Bus connection error: {err}; reconnecting in {backoff:?}");

        tokio::select! {
            biased;
            _ = self.shutdown.requested() => {
                log::info!("Termination requested during bus backoff");
                self.state = LoopState::Stopping;
                return;
            }
            _ = tokio::time::sleep(backoff) => {}
        }

        self.bus.reconnect().await;
    }

    async fn stop(&mut self) {
        log::info!("Stopping dispatcher");
        self.heartbeat.disarm();
        self.bus.disconnect().await;
        self.gateway.close().await;
        log::info!("Dispatcher stopped with status {}", self.last_status);
    }
}
