//! Pub/sub side of the bridge.
//!
//! [`EventBus`] is everything the dispatcher needs from the broker client: the next message or
//! (re)connection, a connection-loss signal, and a way to ask for a reconnect. [`MqttBus`] implements it on top
//! of `rumqttc`, running the client's event loop in a pump task that forwards publishes over a
//! flume channel and parks after every transport error until the dispatcher requests a
//! reconnect. The pump never touches the gateway.
use async_trait::async_trait;
use bytes::Bytes;
use derive_more::{Display, Error};
use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Packet, QoS, StateError,
};
use std::time::Duration;

/// Loop status reported when the last bus poll succeeded.
pub const STATUS_SUCCESS: u8 = 0;

/// Capacity of the pump → dispatcher channel.
const EVENT_CHANNEL_CAPACITY: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Bytes,
}

impl BusMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// What a successful bus poll produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    /// The broker accepted the session (first connect or reconnect).
    Connected,
    Message(BusMessage),
}

/// Transport-level failure of the bus connection.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum BusError {
    #[display("connection lost: {reason}")]
    ConnectionLost {
        #[error(not(source))]
        reason: String,
    },
    #[display("connection refused by broker: {reason}")]
    Refused {
        #[error(not(source))]
        reason: String,
    },
    #[display("protocol error: {reason}")]
    Protocol {
        #[error(not(source))]
        reason: String,
    },
}

impl BusError {
    /// Non-zero loop status code, used as the process exit status.
    pub fn status_code(&self) -> u8 {
        match self {
            BusError::ConnectionLost { .. } => 1,
            BusError::Refused { .. } => 2,
            BusError::Protocol { .. } => 3,
        }
    }
}

impl From<ConnectionError> for BusError {
    fn from(err: ConnectionError) -> Self {
        let reason = err.to_string();
        match err {
            ConnectionError::ConnectionRefused(_) => BusError::Refused { reason },
            ConnectionError::Io(_)
            | ConnectionError::NetworkTimeout
            | ConnectionError::FlushTimeout
            // Keep-alive ping went unanswered.
            | ConnectionError::MqttState(StateError::AwaitPingResp) => {
                BusError::ConnectionLost { reason }
            }
            _ => BusError::Protocol { reason },
        }
    }
}

#[async_trait]
pub trait EventBus: Send {
    /// Wait for the next inbound message or session (re)establishment.
    ///
    /// Must be cancel-safe: the dispatcher drops this future whenever another event wins.
    async fn next_event(&mut self) -> Result<BusEvent, BusError>;

    /// Ask the transport to reconnect after [`EventBus::next_event`] reported an error.
    async fn reconnect(&mut self);

    /// Leave the broker cleanly during shutdown.
    async fn disconnect(&mut self) {}
}

/// Broker endpoint and session settings.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive: Duration,
    /// Subscription filter, may contain `#`/`+` wildcards.
    pub subscription: String,
}

impl BrokerConfig {
    /// Client id derived from the process id, e.g. `mqtt_modbus_4242`.
    pub fn default_client_id() -> String {
        format!("mqtt_modbus_{}", std::process::id())
    }
}

pub struct MqttBus {
    client: AsyncClient,
    events: flume::Receiver<Result<BusEvent, BusError>>,
    reconnect_tx: flume::Sender<()>,
    pump: tokio::task::JoinHandle<()>,
}

impl MqttBus {
    /// Create the client and start the pump. Must run inside a tokio runtime.
    ///
    /// The connection itself is made lazily by the pump; a broker that is down shows up as the
    /// first [`BusError`].
    pub fn start(config: &BrokerConfig) -> Self {
        log::info!(
            "Connecting to MQTT broker {}:{} as '{}'",
            config.host,
            config.port,
            config.client_id
        );

        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(config.keep_alive);
        options.set_clean_session(true);

        let (client, eventloop) = AsyncClient::new(options, EVENT_CHANNEL_CAPACITY);
        let (events_tx, events) = flume::bounded(EVENT_CHANNEL_CAPACITY);
        let (reconnect_tx, reconnect_rx) = flume::unbounded();

        let pump = tokio::spawn(pump_events(
            eventloop,
            client.clone(),
            config.subscription.clone(),
            events_tx,
            reconnect_rx,
        ));

        Self {
            client,
            events,
            reconnect_tx,
            pump,
        }
    }
}

/// Drive the rumqttc event loop, (re)subscribing on every CONNACK.
async fn pump_events(
    mut eventloop: EventLoop,
    client: AsyncClient,
    subscription: String,
    events_tx: flume::Sender<Result<BusEvent, BusError>>,
    reconnect_rx: flume::Receiver<()>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                log::info!("MQTT connected, rc={:?}", ack.code);
                // Clean sessions drop subscriptions, so subscribe again after every connect.
                match client.try_subscribe(subscription.as_str(), QoS::AtMostOnce) {
                    Ok(()) => log::info!("Subscribed to '{subscription}'"),
                    Err(err) => log::error!("Failed to subscribe to '{subscription}': {err}"),
                }
                if events_tx.send_async(Ok(BusEvent::Connected)).await.is_err() {
                    break;
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = BusMessage {
                    topic: publish.topic,
                    payload: publish.payload,
                };
                if events_tx
                    .send_async(Ok(BusEvent::Message(message)))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Ok(_) => {}
            Err(err) => {
                log::warn!("MQTT connection error: {err}");
                if events_tx.send_async(Err(BusError::from(err))).await.is_err() {
                    break;
                }
                // Park until the dispatcher has waited out its backoff.
                if reconnect_rx.recv_async().await.is_err() {
                    break;
                }
                log::info!("Reconnecting to MQTT broker");
            }
        }
    }
    log::debug!("MQTT event pump stopped");
}

#[async_trait]
impl EventBus for MqttBus {
    async fn next_event(&mut self) -> Result<BusEvent, BusError> {
        match self.events.recv_async().await {
            Ok(event) => event,
            Err(_) => Err(BusError::ConnectionLost {
                reason: "MQTT event pump stopped".to_string(),
            }),
        }
    }

    async fn reconnect(&mut self) {
        if self.reconnect_tx.send(()).is_err() {
            log::error!("MQTT event pump is gone, cannot reconnect");
        }
    }

    async fn disconnect(&mut self) {
        if let Err(err) = self.client.try_disconnect() {
            log::debug!("MQTT disconnect request not queued: {err}");
        }
        self.pump.abort();
        log::info!("MQTT client stopped");
    }
}
