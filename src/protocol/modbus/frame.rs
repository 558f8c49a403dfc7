use anyhow::Result;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::{parse_modbus_header, MBAP_PREFIX_LEN};

/// Read one complete Modbus TCP frame (MBAP header included) from `reader`.
///
/// Socket failures surface as `std::io::Error` inside the returned `anyhow::Error`, so callers
/// can tell a broken link apart from a malformed frame with `downcast_ref`. A rejected MBAP
/// header is reported the same way (`InvalidData`): the rest of that frame is still unread, so
/// the stream is out of sync.
pub async fn read_modbus_frame<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut header_buf = [0u8; MBAP_PREFIX_LEN];
    reader.read_exact(&mut header_buf).await?;

    let len = parse_modbus_header(header_buf)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err.to_string()))?;
    let mut full_buf = vec![0u8; len];
    full_buf[..MBAP_PREFIX_LEN].copy_from_slice(&header_buf);
    reader.read_exact(&mut full_buf[MBAP_PREFIX_LEN..]).await?;

    Ok(full_buf)
}
