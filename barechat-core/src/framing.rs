//! Length-prefixed frames over ordered byte streams
//!
//! Each frame is a 4-byte big-endian length followed by that many bytes. Used
//! by the TCP swarm for peer messages and by the control channel.

use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Frame too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Write one frame and flush
pub async fn write_frame<W>(writer: &mut W, bytes: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(bytes.len()).map_err(|_| FrameError::TooLarge {
        size: bytes.len(),
        max: u32::MAX as usize,
    })?;

    let mut buf = Vec::with_capacity(4 + bytes.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(bytes);

    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. `Ok(None)` means the stream ended cleanly between frames.
pub async fn read_frame<R>(reader: &mut R, max: usize) -> Result<Option<Vec<u8>>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    let mut filled = 0;
    while filled < header.len() {
        match reader.read(&mut header[filled..]).await? {
            0 if filled == 0 => return Ok(None),
            0 => {
                return Err(FrameError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("stream ended after {} of 4 header bytes", filled),
                )))
            }
            n => filled += n,
        }
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > max {
        return Err(FrameError::TooLarge { size: len, max });
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}
