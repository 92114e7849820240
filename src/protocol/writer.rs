//! Reply serializer.
//!
//! `ReplyWriter` builds RESP reply frames in an in-memory buffer. Command
//! handlers append exactly one reply per request; the connection then
//! drains the buffer to the socket and flushes once, so a pipelined batch
//! still produces one syscall-sized write per reply.
//!
//! Absent values use the RESP2 null forms: `$-1\r\n` for a null bulk
//! string, `*-1\r\n` for a null array.

use crate::protocol::{prefix, CRLF};
use bytes::{BufMut, Bytes, BytesMut};

/// Buffered writer for RESP replies.
#[derive(Debug, Default)]
pub struct ReplyWriter {
    buf: BytesMut,
}

impl ReplyWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one `<tag><payload>\r\n` line.
    fn line(&mut self, tag: u8, payload: &[u8]) {
        self.buf.reserve(1 + payload.len() + 2);
        self.buf.put_u8(tag);
        self.buf.put_slice(payload);
        self.buf.put_slice(CRLF);
    }

    /// Writes a simple status reply: `+<s>\r\n`.
    pub fn status(&mut self, s: &str) {
        self.line(prefix::STATUS, s.as_bytes());
    }

    /// Writes an error reply: `-<s>\r\n`.
    pub fn error(&mut self, s: &str) {
        self.line(prefix::ERROR, s.as_bytes());
    }

    /// Writes an integer reply: `:<n>\r\n`.
    pub fn int(&mut self, n: i64) {
        self.line(prefix::INTEGER, n.to_string().as_bytes());
    }

    /// Writes a bulk string reply, or the null bulk string when `b` is
    /// absent.
    pub fn string(&mut self, b: Option<&[u8]>) {
        match b {
            Some(data) => {
                self.line(prefix::BULK_STRING, data.len().to_string().as_bytes());
                self.buf.put_slice(data);
                self.buf.put_slice(CRLF);
            }
            None => self.line(prefix::BULK_STRING, b"-1"),
        }
    }

    /// Writes an array of bulk strings; absent elements become null bulk
    /// strings.
    pub fn string_array(&mut self, items: &[Option<Bytes>]) {
        self.line(prefix::ARRAY, items.len().to_string().as_bytes());
        for item in items {
            self.string(item.as_deref());
        }
    }

    /// Writes the null array: `*-1\r\n`.
    pub fn null_array(&mut self) {
        self.line(prefix::ARRAY, b"-1");
    }

    /// Returns true when no reply bytes are pending.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Discards any pending reply bytes.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Takes the pending reply bytes, leaving the writer empty.
    pub fn take(&mut self) -> BytesMut {
        self.buf.split()
    }
}
