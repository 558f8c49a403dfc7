use anyhow::Result;

use rmodbus::{client::ModbusRequest, ModbusProto};

/// Build a Modbus TCP frame writing a single holding register (function 0x06)
pub fn generate_pull_set_holding_request(
    transaction_id: u16,
    unit_id: u8,
    address: u16,
    value: u16,
) -> Result<(ModbusRequest, Vec<u8>)> {
    let mut request = ModbusRequest::new(unit_id, ModbusProto::TcpUdp);
    request.tr_id = transaction_id;
    let mut raw = Vec::new();
    request.generate_set_holding(address, value, &mut raw)?;
    Ok((request, raw))
}

/// Validate the gateway's echo of a single register write.
pub fn parse_pull_set_holding(request: &ModbusRequest, response: &[u8]) -> Result<()> {
    request.parse_ok(response)?;
    Ok(())
}
