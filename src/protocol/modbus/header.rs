use anyhow::{anyhow, Result};

/// MBAP header: transaction id, protocol id, length, unit id.
pub const MBAP_HEADER_LEN: usize = 7;

/// Bytes needed before the full frame length can be derived.
pub const MBAP_PREFIX_LEN: usize = 6;

/// Largest Modbus TCP ADU: MBAP header plus a 253 byte PDU.
pub const MAX_FRAME_LEN: usize = 260;

/// Return the total length of the Modbus TCP frame announced by `buf`.
pub fn parse_modbus_header(buf: [u8; MBAP_PREFIX_LEN]) -> Result<usize> {
    if buf[2] != 0 || buf[3] != 0 {
        return Err(anyhow!(
            "unexpected protocol id 0x{:02x}{:02x} in MBAP header",
            buf[2],
            buf[3]
        ));
    }
    // The length field counts the unit id plus the PDU.
    let len = MBAP_PREFIX_LEN + u16::from_be_bytes([buf[4], buf[5]]) as usize;
    if len <= MBAP_HEADER_LEN || len > MAX_FRAME_LEN {
        return Err(anyhow!("MBAP header announces an invalid frame length ({len} bytes)"));
    }
    Ok(len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_length_includes_prefix() {
        // Echo of a write single register: unit id + 5 byte PDU.
        let len = parse_modbus_header([0x00, 0x01, 0x00, 0x00, 0x00, 0x06]).unwrap();
        assert_eq!(len, 12);
    }

    #[test]
    fn test_header_rejects_foreign_protocol() {
        assert!(parse_modbus_header([0x00, 0x01, 0x12, 0x34, 0x00, 0x06]).is_err());
    }

    #[test]
    fn test_header_rejects_empty_pdu() {
        assert!(parse_modbus_header([0x00, 0x01, 0x00, 0x00, 0x00, 0x01]).is_err());
        assert!(parse_modbus_header([0x00, 0x01, 0x00, 0x00, 0x01, 0x00]).is_err());
    }
}
