//! Framing for JSON messages on a Unix stream socket.
//!
//! A stream socket has no message boundaries, so every message is prefixed
//! with its length:
//!
//! ```text
//! ┌──────────────────┬───────────────────────────────────────────┐
//! │  4 bytes (BE)    │          N bytes                          │
//! │  Message Length  │          JSON Payload                     │
//! └──────────────────┴───────────────────────────────────────────┘
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::trace;

use crate::error::IpcError;

/// Maximum message size (1 MB)
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Read a length-prefixed message from the stream.
///
/// Returns `Ok(Some(message))` on success, `Ok(None)` if the peer closed the
/// stream cleanly before a new frame started, or `Err` on error.
pub async fn read_message<R, M>(reader: &mut R) -> Result<Option<M>, IpcError>
where
    R: AsyncReadExt + Unpin,
    M: DeserializeOwned,
{
    // Read the 4-byte length prefix
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Ok(None);
        }
        Err(e) => return Err(IpcError::Io(e)),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    trace!(length = len, "Reading message payload");

    if len > MAX_MESSAGE_SIZE {
        return Err(IpcError::MessageTooLarge(len));
    }

    let mut payload_buf = vec![0u8; len];
    reader.read_exact(&mut payload_buf).await?;

    let message = serde_json::from_slice(&payload_buf)?;
    Ok(Some(message))
}

/// Write a length-prefixed message to the stream.
pub async fn write_message<W, M>(writer: &mut W, message: &M) -> Result<(), IpcError>
where
    W: AsyncWriteExt + Unpin,
    M: Serialize,
{
    let payload = serde_json::to_vec(message)?;
    let len = payload.len();

    trace!(length = len, "Writing message");

    if len > MAX_MESSAGE_SIZE {
        return Err(IpcError::MessageTooLarge(len));
    }

    writer.write_all(&(len as u32).to_be_bytes()).await?;
    writer.write_all(&payload).await?;

    // Flush to ensure delivery
    writer.flush().await?;

    Ok(())
}
