//! Length-prefixed wire framing.
//!
//! Every frame is an unsigned 64-bit little-endian byte count followed by
//! that many bytes. A request is one frame holding an encoded image. A
//! response is two frames: UTF-8 metadata (empty when there is none),
//! then the encoded restored image.
//!
//! Readers reject frames larger than a configurable limit before
//! allocating.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::TransportError;

/// Default upper bound on a single frame: 256 MiB.
pub const DEFAULT_FRAME_LIMIT: u64 = 256 * 1024 * 1024;

/// A server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Human-readable processing summary, if the server sent one.
    pub metadata: Option<String>,
    /// Encoded restored image.
    pub image: Vec<u8>,
}

/// Write one length-prefixed frame.
///
/// # Errors
///
/// Returns [`TransportError::Io`] if the stream fails.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let len = u64::try_from(payload.len()).map_err(|_| TransportError::FrameTooLarge {
        len: u64::MAX,
        limit: u64::MAX,
    })?;
    writer.write_u64_le(len).await?;
    writer.write_all(payload).await?;
    Ok(())
}

/// Read one length-prefixed frame of at most `limit` bytes.
///
/// # Errors
///
/// Returns [`TransportError::FrameTooLarge`] if the announced length
/// exceeds `limit` and [`TransportError::Io`] if the stream fails or
/// ends early.
pub async fn read_frame<R>(reader: &mut R, limit: u64) -> Result<Vec<u8>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u64_le().await?;
    if len > limit {
        return Err(TransportError::FrameTooLarge { len, limit });
    }
    let len = usize::try_from(len).map_err(|_| TransportError::FrameTooLarge { len, limit })?;
    let mut buf = vec![0; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Send an encoded image as a request.
///
/// # Errors
///
/// Returns [`TransportError::Io`] if the stream fails.
pub async fn write_request<W>(writer: &mut W, image: &[u8]) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    write_frame(writer, image).await?;
    writer.flush().await?;
    Ok(())
}

/// Receive a request's encoded image.
///
/// # Errors
///
/// See [`read_frame`].
pub async fn read_request<R>(reader: &mut R, limit: u64) -> Result<Vec<u8>, TransportError>
where
    R: AsyncRead + Unpin,
{
    read_frame(reader, limit).await
}

/// Send a response.
///
/// # Errors
///
/// Returns [`TransportError::Io`] if the stream fails.
pub async fn write_response<W>(writer: &mut W, response: &Response) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let metadata = response.metadata.as_deref().unwrap_or_default();
    write_frame(writer, metadata.as_bytes()).await?;
    write_frame(writer, &response.image).await?;
    writer.flush().await?;
    Ok(())
}

/// Receive a response.
///
/// # Errors
///
/// Returns [`TransportError::InvalidMetadata`] if the metadata is not
/// UTF-8, otherwise see [`read_frame`].
pub async fn read_response<R>(reader: &mut R, limit: u64) -> Result<Response, TransportError>
where
    R: AsyncRead + Unpin,
{
    let metadata = read_frame(reader, limit).await?;
    let metadata = if metadata.is_empty() {
        None
    } else {
        Some(String::from_utf8(metadata)?)
    };
    let image = read_frame(reader, limit).await?;
    Ok(Response { metadata, image })
}
