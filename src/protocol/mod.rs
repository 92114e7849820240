//! RESP2 Wire Protocol
//!
//! This module implements the subset of the Redis Serialization Protocol
//! the server speaks: requests are always arrays of bulk strings, replies
//! use simple statuses, errors, integers, bulk strings and arrays.
//!
//! ## Modules
//!
//! - `reader`: incremental request parser (array-of-bulk-strings only)
//! - `writer`: reply serializer backed by an in-memory buffer
//!
//! ## Example
//!
//! ```
//! use cinderkv::protocol::{parse_request, ReplyWriter};
//!
//! let data = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
//! let (args, consumed) = parse_request(data).unwrap().unwrap();
//! assert_eq!(args.len(), 2);
//! assert_eq!(consumed, data.len());
//!
//! let mut reply = ReplyWriter::new();
//! reply.status("OK");
//! assert_eq!(&reply.take()[..], b"+OK\r\n");
//! ```

pub mod reader;
pub mod writer;

// Re-export commonly used items for convenience
pub use reader::{parse_request, FrameError, FrameResult};
pub use writer::ReplyWriter;

/// The CRLF terminator used by every RESP line
pub const CRLF: &[u8] = b"\r\n";

/// RESP type tag bytes
pub mod prefix {
    pub const STATUS: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}
