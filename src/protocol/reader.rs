//! Incremental RESP2 request parser.
//!
//! A request is always an array of bulk strings:
//!
//! ```text
//! *2\r\n$3\r\nGET\r\n$4\r\nname\r\n
//! ```
//!
//! The parser works over a caller-owned buffer and returns either:
//! - `Ok(Some((args, consumed)))` - a complete request, `consumed` bytes used
//! - `Ok(None)` - incomplete data, the caller should read more bytes
//! - `Err(FrameError)` - the stream is not valid RESP
//!
//! This design lets the connection loop append incoming socket data to a
//! `BytesMut`, attempt a parse, and advance the buffer on success. A line
//! split across socket reads simply parses as incomplete until the rest
//! arrives, so multi-chunk requests need no extra state.
//!
//! Any deviation from the request grammar (wrong type tag, negative or
//! oversized length, a line not terminated by CRLF) is a frame error and
//! is fatal to the connection.

use crate::protocol::{prefix, CRLF};
use bytes::Bytes;
use thiserror::Error;

/// Maximum size for a single bulk string (512 MB, same as Redis)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Errors that can occur while framing a request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The first line of a request does not start with `*`
    #[error("expecting array, got {0:#04x}")]
    ExpectedArray(u8),

    /// An element line does not start with `$`
    #[error("expecting bulk string, got {0:#04x}")]
    ExpectedBulkString(u8),

    /// A line is too short or not terminated by `\r\n`
    #[error("invalid line terminator")]
    InvalidLine,

    /// A length field is not a decimal integer
    #[error("invalid length: {0}")]
    InvalidLength(String),

    /// Request arrays must contain at least one element
    #[error("invalid array length: {0}")]
    InvalidArrayLength(i64),

    /// Bulk lengths must be non-negative in requests (`$-1` is reserved
    /// for replies)
    #[error("invalid bulk string length: {0}")]
    InvalidBulkLength(i64),

    /// A bulk string exceeds [`MAX_BULK_SIZE`]
    #[error("bulk string too large: {size} bytes (max: {max})")]
    BulkTooLarge { size: usize, max: usize },

    /// The two bytes after a bulk payload are not CRLF
    #[error("bulk string missing trailing CRLF")]
    MissingCrlf,
}

/// Result type for framing operations.
pub type FrameResult<T> = Result<T, FrameError>;

/// Attempts to parse one complete request from the front of `buf`.
///
/// Returns the ordered argument vector and the number of bytes consumed,
/// or `Ok(None)` when `buf` holds only a prefix of a request.
pub fn parse_request(buf: &[u8]) -> FrameResult<Option<(Vec<Bytes>, usize)>> {
    let (header, mut consumed) = match read_line(buf)? {
        Some(line) => line,
        None => return Ok(None),
    };

    if header[0] != prefix::ARRAY {
        return Err(FrameError::ExpectedArray(header[0]));
    }
    let count = parse_length(&header[1..])?;
    if count < 1 {
        return Err(FrameError::InvalidArrayLength(count));
    }
    let count = count as usize;

    // cap the preallocation; an oversized count fails later against the
    // connection's buffer limit
    let mut args = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        match parse_bulk(&buf[consumed..])? {
            Some((arg, used)) => {
                args.push(arg);
                consumed += used;
            }
            None => return Ok(None),
        }
    }

    Ok(Some((args, consumed)))
}

/// Parses one bulk string: `$<length>\r\n<data>\r\n`.
fn parse_bulk(buf: &[u8]) -> FrameResult<Option<(Bytes, usize)>> {
    let (header, header_len) = match read_line(buf)? {
        Some(line) => line,
        None => return Ok(None),
    };

    if header[0] != prefix::BULK_STRING {
        return Err(FrameError::ExpectedBulkString(header[0]));
    }
    let len = parse_length(&header[1..])?;
    if len < 0 {
        return Err(FrameError::InvalidBulkLength(len));
    }
    let len = len as usize;
    if len > MAX_BULK_SIZE {
        return Err(FrameError::BulkTooLarge {
            size: len,
            max: MAX_BULK_SIZE,
        });
    }

    let total = header_len + len + 2;
    if buf.len() < total {
        return Ok(None);
    }
    if &buf[header_len + len..total] != CRLF {
        return Err(FrameError::MissingCrlf);
    }

    let data = Bytes::copy_from_slice(&buf[header_len..header_len + len]);
    Ok(Some((data, total)))
}

/// Finds the next line in `buf`.
///
/// A line runs up to and including `\n`; it must be at least three bytes
/// long and the byte before `\n` must be `\r`. Returns the line with CRLF
/// stripped plus the raw length, or `None` if no `\n` has arrived yet.
fn read_line(buf: &[u8]) -> FrameResult<Option<(&[u8], usize)>> {
    let nl = match buf.iter().position(|&b| b == b'\n') {
        Some(pos) => pos,
        None => return Ok(None),
    };
    if nl < 2 || buf[nl - 1] != b'\r' {
        return Err(FrameError::InvalidLine);
    }
    Ok(Some((&buf[..nl - 1], nl + 1)))
}

/// Parses a decimal length field (array or bulk header).
fn parse_length(digits: &[u8]) -> FrameResult<i64> {
    let s = std::str::from_utf8(digits)
        .map_err(|_| FrameError::InvalidLength(String::from_utf8_lossy(digits).into_owned()))?;
    s.parse()
        .map_err(|_| FrameError::InvalidLength(s.to_string()))
}
