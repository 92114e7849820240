//! # cinderkv - A Bounded-Memory In-Memory Key-Value Cache
//!
//! cinderkv is a single-process cache server speaking a simplified RESP2
//! protocol over TCP. It stores opaque byte strings and field/value
//! hashes, enforces a byte budget by evicting least-recently-used
//! entries, and expires keys with millisecond resolution - lazily on
//! access plus a probabilistic background sweep.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                           cinderkv                             │
//! │                                                                │
//! │  ┌────────────┐     ┌────────────┐     ┌────────────┐          │
//! │  │  Server    │────>│ Connection │────>│ Dispatcher │          │
//! │  │ (listener) │     │   (loop)   │     │ (commands) │          │
//! │  └────────────┘     └─────┬──────┘     └─────┬──────┘          │
//! │                           │                  │                 │
//! │                     ┌─────┴──────┐     ┌─────▼──────┐          │
//! │                     │ RESP codec │     │   Cache    │          │
//! │                     │ read/write │     │ LRU + TTL  │          │
//! │                     └────────────┘     └─────▲──────┘          │
//! │                                              │                 │
//! │                                   ┌──────────┴─────────┐       │
//! │                                   │     GC sweeper     │       │
//! │                                   │ (background task)  │       │
//! │                                   └────────────────────┘       │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! One task per connection, one accept task, one GC task. The cache is
//! shared behind a single mutex; every operation (including the eviction
//! it may trigger) is atomic.
//!
//! ## Module Overview
//!
//! - [`protocol`]: RESP2 request reader and reply writer
//! - [`storage`]: the LRU/TTL cache engine and its GC sweeper
//! - [`commands`]: per-command handlers and the dispatcher
//! - [`connection`]: per-socket command loop and counters
//! - [`server`]: listener, accept loop, stop

pub mod commands;
pub mod connection;
pub mod protocol;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::{CommandError, Dispatcher};
pub use connection::{handle_connection, ConnectionStats};
pub use protocol::{parse_request, ReplyWriter};
pub use server::Server;
pub use storage::{Cache, GcConfig, GcHandle};

/// One kibibyte.
pub const KB: usize = 1 << 10;

/// One mebibyte.
pub const MB: usize = 1 << 20;

/// Version of cinderkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
