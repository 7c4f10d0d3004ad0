use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::utils::{Result, SwarmError};

/// Upper bound on a single unterminated frame. Protects the receiver from a
/// peer that streams data without ever sending a newline.
pub const MAX_FRAME_BYTES: usize = 20 * 1024 * 1024;

const READ_CHUNK: usize = 64 * 1024;

/// Serialize one message as JSON, append the newline terminator and write it
/// out in full.
pub async fn send_frame<S, T>(stream: &mut S, message: &T) -> Result<()>
where
    S: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut data = serde_json::to_vec(message)?;
    data.push(b'\n');
    stream.write_all(&data).await?;
    stream.flush().await?;
    Ok(())
}

/// Receive one newline-terminated JSON message. `Ok(None)` means the peer
/// closed the connection before completing a frame.
pub async fn recv_frame<S, T>(stream: &mut S) -> Result<Option<T>>
where
    S: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    match recv_line(stream).await? {
        Some(line) => Ok(Some(serde_json::from_slice(&line)?)),
        None => Ok(None),
    }
}

/// Accumulate bytes until the first newline, returning the line without its
/// terminator. Fails once more than [`MAX_FRAME_BYTES`] pile up unterminated.
async fn recv_line<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Option<Vec<u8>>> {
    let mut buffer: Vec<u8> = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];
    let mut searched = 0;

    loop {
        if let Some(pos) = buffer[searched..].iter().position(|&b| b == b'\n') {
            buffer.truncate(searched + pos);
            return Ok(Some(buffer));
        }
        searched = buffer.len();
        if buffer.len() > MAX_FRAME_BYTES {
            return Err(SwarmError::FrameTooLarge(MAX_FRAME_BYTES));
        }

        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(None);
        }
        buffer.extend_from_slice(&chunk[..n]);
    }
}
