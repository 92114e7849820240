//! Client Connection Management
//!
//! One task per accepted socket. The handler owns a framed reader and a
//! buffered writer over the stream, and loops: read one request,
//! dispatch, reply, flush. Shared [`ConnectionStats`] track accepted and
//! active connections for INFO.

pub mod handler;

// Re-export the connection entry points
pub use handler::{handle_connection, Connection, ConnectionError, ConnectionStats};
