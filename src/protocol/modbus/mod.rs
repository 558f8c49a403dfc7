//! Modbus TCP framing on top of `rmodbus`.
//!
//! Only the two functions the bridge needs are covered: write single register (0x06) for
//! actuation and read holding registers (0x03) for the heartbeat probe.
mod frame;
mod header;
mod pull_get_holdings;
mod pull_set_holdings;

pub use frame::read_modbus_frame;
pub use header::{parse_modbus_header, MAX_FRAME_LEN, MBAP_HEADER_LEN, MBAP_PREFIX_LEN};
pub use pull_get_holdings::{
    generate_pull_get_holdings_request, parse_pull_get_holdings, MAX_READ_COUNT,
};
pub use pull_set_holdings::{generate_pull_set_holding_request, parse_pull_set_holding};
