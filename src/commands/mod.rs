//! Command Processing Layer
//!
//! Sits between the wire protocol and the cache:
//!
//! ```text
//! request args ──> Dispatcher ──> Cache
//!                      │
//!                      └──> ReplyWriter (one reply per request)
//! ```
//!
//! Handlers never write partial replies: either the success reply is
//! written in full, or a [`CommandError`] comes back and the connection
//! loop turns it into an error frame.

pub mod handler;

// Re-export the dispatcher types
pub use handler::{CommandError, Dispatcher};
