//! Async message framing.
//!
//! This module provides async versions of the codec functions for use with tokio.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::codec::MsgParser;
use crate::error::Result;

/// Read one frame body from an async stream.
pub async fn read_frame_async<R: AsyncRead + Unpin>(
    parser: &MsgParser,
    reader: &mut R,
) -> Result<Bytes> {
    let mut header = [0u8; 4];
    let header = &mut header[..parser.length_field.size()];
    reader.read_exact(header).await?;

    let len = parser.decode_len(header);
    parser.check_incoming(len)?;

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Bytes::from(body))
}

/// Write the concatenation of `parts` as one frame to an async stream.
pub async fn write_frame_async<W: AsyncWrite + Unpin>(
    parser: &MsgParser,
    writer: &mut W,
    parts: &[&[u8]],
) -> Result<()> {
    let frame = parser.encode_frame(parts)?;
    writer.write_all(&frame).await?;
    Ok(())
}
