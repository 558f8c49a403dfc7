//! Field-bus gateway seam used by the dispatcher and the heartbeat supervisor.
//!
//! [`super::GatewayConnection`] is the Modbus TCP implementation; tests substitute scripted
//! fakes so that scenarios can be checked without a network.
use async_trait::async_trait;

use super::error::{ConnError, GatewayIoError};

#[async_trait]
pub trait FieldbusGateway: Send {
    /// Whether a transport connection is currently held.
    fn is_connected(&self) -> bool;

    /// Open the connection if needed and select the remote unit.
    ///
    /// A no-op when already connected. On failure the gateway stays disconnected.
    async fn ensure_connected(&mut self) -> Result<(), ConnError>;

    /// Write one holding register. Single-shot: never retried internally.
    async fn write_register(&mut self, addr: u16, value: u16) -> Result<(), GatewayIoError>;

    /// Read `count` contiguous holding registers starting at `addr`.
    async fn read_registers(&mut self, addr: u16, count: u16) -> Result<Vec<u16>, GatewayIoError>;

    /// Release the transport. Safe to call when already disconnected.
    async fn close(&mut self);
}
