//! # Wire Framing Primitives
//!
//! Low-level framing for the session protocol. The wire format mixes text
//! and control bytes:
//!
//! - **NulString**: non-zero bytes terminated by a single `0x00` byte.
//! - **StatusByte**: one byte, `0` = success, `1` = failure.
//! - **Escaped content**: raw bytes where `0xFF` escapes the following byte
//!   (so literal `0x00`/`0xFF` travel as `0xFF 0x00` / `0xFF 0xFF`) and an
//!   unescaped `0x00` terminates the stream. Used for ingest documents.
//! - **Selectors**: the leading byte of every request chooses the
//!   sub-protocol; any value outside the reserved range is the first byte of
//!   plain command text.
//!
//! All reads are bounded by a caller-supplied limit; exceeding it is a
//! transport-fatal [`SessionError::OversizedFrame`].

use crate::error::{constants, Result, SessionError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Terminates strings, result payloads, and the nonce frame.
pub const TERMINATOR: u8 = 0x00;

/// Escape byte for raw document content.
pub const ESCAPE: u8 = 0xFF;

/// Status byte for success.
pub const STATUS_OK: u8 = 0x00;

/// Status byte for failure.
pub const STATUS_ERR: u8 = 0x01;

/// Selector values for the multiplexed sub-protocols.
pub const SELECTOR_QUERY_OPEN: u8 = 0x00;
pub const SELECTOR_QUERY_ADVANCE: u8 = 0x01;
pub const SELECTOR_QUERY_CLOSE: u8 = 0x02;
pub const SELECTOR_INGEST: u8 = 0x03;

/// One decoded request head.
///
/// The decode is total: every byte value maps to exactly one variant, so the
/// session loop never branches on raw integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    /// Open a new query iterator.
    QueryOpen,
    /// Advance an open iterator by one item.
    QueryAdvance,
    /// Close an iterator.
    QueryClose,
    /// Create a database from streamed document content.
    Ingest,
    /// Plain command text; the carried byte is the first byte of the text.
    Command(u8),
}

impl Request {
    /// Decode the leading byte of a request.
    pub fn decode(byte: u8) -> Self {
        match byte {
            SELECTOR_QUERY_OPEN => Request::QueryOpen,
            SELECTOR_QUERY_ADVANCE => Request::QueryAdvance,
            SELECTOR_QUERY_CLOSE => Request::QueryClose,
            SELECTOR_INGEST => Request::Ingest,
            other => Request::Command(other),
        }
    }
}

/// Read raw bytes up to (and consuming) the terminator.
pub async fn read_nul_bytes<R>(reader: &mut R, max_len: usize) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    loop {
        let byte = reader.read_u8().await?;
        if byte == TERMINATOR {
            return Ok(buf);
        }
        if buf.len() >= max_len {
            return Err(SessionError::OversizedFrame(buf.len() + 1));
        }
        buf.push(byte);
    }
}

/// Read a NulString and validate it as UTF-8.
pub async fn read_nul_string<R>(reader: &mut R, max_len: usize) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    let bytes = read_nul_bytes(reader, max_len).await?;
    String::from_utf8(bytes)
        .map_err(|_| SessionError::InvalidString(constants::ERR_FRAME_NOT_UTF8.into()))
}

/// Read escaped raw content up to the unescaped terminator.
pub async fn read_escaped_content<R>(reader: &mut R, max_len: usize) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    loop {
        let byte = reader.read_u8().await?;
        let byte = match byte {
            TERMINATOR => return Ok(buf),
            ESCAPE => reader.read_u8().await?,
            other => other,
        };
        if buf.len() >= max_len {
            return Err(SessionError::OversizedFrame(buf.len() + 1));
        }
        buf.push(byte);
    }
}

/// Write a NulString. Rejects values with embedded NUL bytes, since those
/// could never be read back as one frame.
pub async fn write_nul_string<W>(writer: &mut W, value: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if value.bytes().any(|b| b == TERMINATOR) {
        return Err(SessionError::InvalidString(
            constants::ERR_EMBEDDED_NUL.into(),
        ));
    }
    writer.write_all(value.as_bytes()).await?;
    writer.write_u8(TERMINATOR).await?;
    Ok(())
}

/// Write escaped raw content followed by the terminator.
pub async fn write_escaped_content<W>(writer: &mut W, content: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    for &byte in content {
        if byte == TERMINATOR || byte == ESCAPE {
            writer.write_u8(ESCAPE).await?;
        }
        writer.write_u8(byte).await?;
    }
    writer.write_u8(TERMINATOR).await?;
    Ok(())
}

/// Write a bare terminator byte (end of a result payload).
pub async fn write_terminator<W>(writer: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_u8(TERMINATOR).await?;
    Ok(())
}

/// Write a status byte: `0` on success, `1` on failure.
pub async fn write_status<W>(writer: &mut W, ok: bool) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_u8(if ok { STATUS_OK } else { STATUS_ERR }).await?;
    Ok(())
}
