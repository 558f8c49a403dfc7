//! Modbus TCP connection to the field-bus gateway.
//!
//! The connection is owned by exactly one task (the dispatcher); every operation takes
//! `&mut self`, so no locking is involved.
mod error;
mod traits;

pub use error::{ConnError, GatewayIoError};
pub use traits::FieldbusGateway;

use async_trait::async_trait;
use derive_more::Display;
use std::time::Duration;
use strum::Display as StrumDisplay;
use tokio::{
    io::AsyncWriteExt,
    net::TcpStream,
    time::timeout,
};

use crate::protocol::modbus::{
    generate_pull_get_holdings_request, generate_pull_set_holding_request,
    parse_pull_get_holdings, parse_pull_set_holding, read_modbus_frame,
};

/// Connection state as observed from outside. Derived from socket ownership, so a socket is
/// held exactly when the state is `Connected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, StrumDisplay)]
#[strum(serialize_all = "snake_case")]
pub enum ConnState {
    Disconnected,
    Connected,
}

/// Endpoint and timeouts of the gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
    /// Upper bound for opening the TCP connection.
    pub connect_timeout: Duration,
    /// Upper bound for one request/response exchange.
    pub io_timeout: Duration,
}

impl GatewayConfig {
    pub fn new(host: impl Into<String>, port: u16, unit_id: u8) -> Self {
        Self {
            host: host.into(),
            port,
            unit_id,
            connect_timeout: Duration::from_millis(3000),
            io_timeout: Duration::from_millis(1000),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Modbus TCP can address units 0-247, plus 255 for gateways that ignore the field.
pub fn validate_unit_id(unit_id: u8) -> Result<(), String> {
    match unit_id {
        0..=247 | 255 => Ok(()),
        other => Err(format!("unit id {other} is outside 0-247 and 255")),
    }
}

/// Why a request/response exchange failed.
#[derive(Debug, Display)]
enum ExchangeFailure {
    /// Socket error, EOF or timeout: the stream can no longer be trusted.
    #[display("link error: {_0}")]
    Link(String),
    /// The gateway answered, but with an exception or an unusable frame.
    #[display("{_0}")]
    Protocol(String),
}

impl ExchangeFailure {
    fn is_link(&self) -> bool {
        matches!(self, ExchangeFailure::Link(_))
    }
}

pub struct GatewayConnection {
    config: GatewayConfig,
    stream: Option<TcpStream>,
    transaction_id: u16,
}

impl GatewayConnection {
    /// Create a disconnected gateway handle. Nothing is dialed until first use.
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            stream: None,
            transaction_id: 0,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn state(&self) -> ConnState {
        if self.stream.is_some() {
            ConnState::Connected
        } else {
            ConnState::Disconnected
        }
    }

    fn next_transaction_id(&mut self) -> u16 {
        self.transaction_id = self.transaction_id.wrapping_add(1);
        self.transaction_id
    }

    /// Open the socket and select the unit. Nothing is kept on failure.
    async fn dial(&self) -> Result<TcpStream, ConnError> {
        let addr = self.config.addr();
        log::info!("Connecting to Modbus gateway {addr}");

        let connect = TcpStream::connect((self.config.host.as_str(), self.config.port));
        let stream = match timeout(self.config.connect_timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                log::error!("Modbus connection to {addr} failed: {source}");
                return Err(ConnError::DialFailed { addr, source });
            }
            Err(_) => {
                let source = std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("no answer within {:?}", self.config.connect_timeout),
                );
                log::error!("Modbus connection to {addr} failed: {source}");
                return Err(ConnError::DialFailed { addr, source });
            }
        };

        if let Err(err) = stream.set_nodelay(true) {
            log::debug!("Could not disable Nagle on gateway socket: {err}");
        }

        if let Err(reason) = validate_unit_id(self.config.unit_id) {
            log::error!("Selecting Modbus unit failed: {reason}");
            // Dropping the stream closes the half-initialized connection.
            drop(stream);
            return Err(ConnError::UnitSelectFailed {
                unit_id: self.config.unit_id,
                reason,
            });
        }

        log::info!(
            "Connected to Modbus gateway {addr}, unit {}",
            self.config.unit_id
        );
        Ok(stream)
    }

    /// Send one request frame and read back one response frame.
    async fn exchange(&mut self, request: &[u8]) -> Result<Vec<u8>, ExchangeFailure> {
        let io_timeout = self.config.io_timeout;
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| ExchangeFailure::Link("no open socket".to_string()))?;

        let round_trip = async {
            stream.write_all(request).await?;
            let frame = read_modbus_frame(stream).await?;
            Ok::<_, anyhow::Error>(frame)
        };

        match timeout(io_timeout, round_trip).await {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(err)) if err.downcast_ref::<std::io::Error>().is_some() => {
                Err(ExchangeFailure::Link(err.to_string()))
            }
            Ok(Err(err)) => Err(ExchangeFailure::Protocol(err.to_string())),
            Err(_) => Err(ExchangeFailure::Link(format!(
                "no response within {io_timeout:?}"
            ))),
        }
    }

    /// Link-level recovery after a transport failure: drop the broken socket and redial once.
    /// The failed request is not replayed.
    async fn recover_link(&mut self) {
        self.stream = None;
        log::warn!(
            "Re-establishing Modbus link to {} after transport failure",
            self.config.addr()
        );
        match self.dial().await {
            Ok(stream) => self.stream = Some(stream),
            Err(err) => log::error!("Link recovery failed, gateway left disconnected: {err}"),
        }
    }
}

#[async_trait]
impl FieldbusGateway for GatewayConnection {
    fn is_connected(&self) -> bool {
        self.state() == ConnState::Connected
    }

    async fn ensure_connected(&mut self) -> Result<(), ConnError> {
        if self.stream.is_some() {
            return Ok(());
        }
        let stream = self.dial().await?;
        self.stream = Some(stream);
        Ok(())
    }

    async fn write_register(&mut self, addr: u16, value: u16) -> Result<(), GatewayIoError> {
        if self.stream.is_none() {
            log::warn!("Write of register {addr} skipped: not connected");
            return Err(GatewayIoError::NotConnected);
        }

        let transaction_id = self.next_transaction_id();
        let (request, raw) =
            generate_pull_set_holding_request(transaction_id, self.config.unit_id, addr, value)
                .map_err(|err| GatewayIoError::WriteFailed {
                    addr,
                    reason: err.to_string(),
                })?;

        let outcome = match self.exchange(&raw).await {
            Ok(frame) => parse_pull_set_holding(&request, &frame)
                .map_err(|err| ExchangeFailure::Protocol(err.to_string())),
            Err(failure) => Err(failure),
        };

        match outcome {
            Ok(()) => {
                log::info!("Wrote {value} to register {addr}");
                Ok(())
            }
            Err(failure) => {
                log::error!("Write of register {addr} failed: {failure}");
                if failure.is_link() {
                    self.recover_link().await;
                }
                Err(GatewayIoError::WriteFailed {
                    addr,
                    reason: failure.to_string(),
                })
            }
        }
    }

    async fn read_registers(&mut self, addr: u16, count: u16) -> Result<Vec<u16>, GatewayIoError> {
        if self.stream.is_none() {
            log::warn!("Read of {count} register(s) at {addr} skipped: not connected");
            return Err(GatewayIoError::NotConnected);
        }

        let transaction_id = self.next_transaction_id();
        let (request, raw) =
            generate_pull_get_holdings_request(transaction_id, self.config.unit_id, addr, count)
                .map_err(|err| GatewayIoError::ReadFailed {
                    addr,
                    count,
                    reason: err.to_string(),
                })?;

        let outcome = match self.exchange(&raw).await {
            Ok(frame) => parse_pull_get_holdings(&request, &frame)
                .map_err(|err| ExchangeFailure::Protocol(err.to_string())),
            Err(failure) => Err(failure),
        };

        match outcome {
            Ok(values) => {
                log::info!("Read {} register(s) at {addr}", values.len());
                for (index, value) in values.iter().enumerate() {
                    log::info!("\t[{index}] 0x{value:04x}");
                }
                Ok(values)
            }
            Err(failure) => {
                log::error!("Read of {count} register(s) at {addr} failed: {failure}");
                if failure.is_link() {
                    self.recover_link().await;
                }
                Err(GatewayIoError::ReadFailed {
                    addr,
                    count,
                    reason: failure.to_string(),
                })
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(err) = stream.shutdown().await {
                log::debug!("Gateway socket shutdown reported: {err}");
            }
            log::info!("Closed Modbus connection to {}", self.config.addr());
        }
    }
}
