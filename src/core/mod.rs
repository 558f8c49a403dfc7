//! Event-to-actuation core of the bridge.
//!
//! - `translator`: topic/payload to register command mapping
//! - `heartbeat`: watchdog deadline and gateway probe
//! - `bus`: pub/sub transport seam and its MQTT implementation
//! - `signals`: cooperative termination requests
//! - `dispatch`: the single control loop tying them together
pub mod bus;
pub mod dispatch;
pub mod heartbeat;
pub mod signals;
pub mod translator;

pub use bus::{BrokerConfig, BusError, BusEvent, BusMessage, EventBus, MqttBus, STATUS_SUCCESS};
pub use dispatch::{
    ConnectionPersistence, DispatchPolicy, Dispatcher, LoopState, MessageOutcome,
};
pub use heartbeat::{HeartbeatProbe, HeartbeatSupervisor, PollOutcome, TimerState};
pub use signals::{install_signal_handlers, shutdown_channel, ShutdownHandle, ShutdownSignal};
pub use translator::{decode_payload, Command, CommandTranslator, TopicMapping};
