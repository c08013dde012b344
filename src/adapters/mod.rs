//! Seams to the outside world: broker, cache, relational store and client
//! connections. Each comes with an in-process implementation.

pub mod cache;
pub mod connection;
pub mod durable_log;
pub mod persistence;

pub use cache::{Cache, MemoryCache};
pub use connection::{Connection, FramedConnection};
pub use durable_log::{DurableLog, LogRecord, LogStream, MemoryLog};
pub use persistence::{GroupInfo, MemoryStore, MessageFilter, Persistence, SortOrder};
