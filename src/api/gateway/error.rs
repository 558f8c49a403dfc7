use derive_more::{Display, Error};

/// Failure to bring the gateway connection up.
#[derive(Debug, Display, Error)]
pub enum ConnError {
    /// The TCP connection to the gateway could not be opened.
    #[display("failed to dial gateway {addr}: {source}")]
    DialFailed {
        addr: String,
        source: std::io::Error,
    },
    /// The socket opened but the configured unit id cannot be addressed.
    #[display("failed to select unit {unit_id}: {reason}")]
    UnitSelectFailed {
        unit_id: u8,
        #[error(not(source))]
        reason: String,
    },
}

/// Failure of a single register operation on an established connection.
#[derive(Debug, Display, Error)]
pub enum GatewayIoError {
    #[display("not connected to the gateway")]
    NotConnected,
    #[display("write of register {addr} failed: {reason}")]
    WriteFailed {
        addr: u16,
        #[error(not(source))]
        reason: String,
    },
    #[display("read of {count} register(s) at {addr} failed: {reason}")]
    ReadFailed {
        addr: u16,
        count: u16,
        #[error(not(source))]
        reason: String,
    },
}
