//! Connection management for Tidewire.
//!
//! This crate turns an opened transport endpoint into a live, typed
//! message connection:
//!
//! 1. **Connection** ([`Connection`]): four FIFO queues, four worker
//!    tasks, a lifecycle state machine, ping/latency.
//! 2. **Connection set** ([`ConnectionSet`]): the server's registry of
//!    live connections, with fan-out sends and one aggregation loop.
//!
//! # How it fits in the stack
//!
//! ```text
//! Application (above)   ← enqueue packets, service inbound queues
//!     ↕
//! Connection Layer (this crate)   ← queues, workers, lifecycle
//!     ↕
//! Protocol Layer (below)   ← catalog, framing, core messages
//!     ↕
//! Transport Layer (below)   ← TCP stream + UDP socket per peer
//! ```
//!
//! Enqueueing never blocks and never fails loudly: once a connection has
//! started terminating, new packets are dropped. Failures inside the
//! workers surface as exactly one `Disconnect` notice on the inbound
//! reliable queue.

mod config;
mod connection;
mod error;
mod queue;
mod set;
mod worker;

pub use config::ConnectionConfig;
pub use connection::{Connection, ConnectionState, Role};
pub use error::ConnectionError;
pub use set::ConnectionSet;
