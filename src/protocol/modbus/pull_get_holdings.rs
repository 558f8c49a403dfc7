use anyhow::{anyhow, Result};

use rmodbus::{client::ModbusRequest, ModbusProto};

/// Largest register count a single read holding registers request may carry.
pub const MAX_READ_COUNT: u16 = 125;

pub fn generate_pull_get_holdings_request(
    transaction_id: u16,
    unit_id: u8,
    start_address: u16,
    count: u16,
) -> Result<(ModbusRequest, Vec<u8>)> {
    if count == 0 || count > MAX_READ_COUNT {
        return Err(anyhow!(
            "register count {count} outside 1..={MAX_READ_COUNT}"
        ));
    }
    let mut request = ModbusRequest::new(unit_id, ModbusProto::TcpUdp);
    request.tr_id = transaction_id;
    let mut raw = Vec::new();
    request.generate_get_holdings(start_address, count, &mut raw)?;
    Ok((request, raw))
}

pub fn parse_pull_get_holdings(request: &ModbusRequest, response: &[u8]) -> Result<Vec<u16>> {
    request.parse_ok(response)?;

    let mut values = Vec::with_capacity(request.count as usize);
    request.parse_u16(response, &mut values)?;
    log::debug!("Received holding registers response: {response:02x?}");

    Ok(values)
}
