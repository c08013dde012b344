//! hybridchat – a chat message router that rides an in-process queue and
//! spills onto a durable broker under sustained load.
//!
//! This crate exports
//!  * `core`     – envelopes, sessions, transport switching, fan-out, offload
//!  * `adapters` – broker, cache, store and connection seams with in-memory impls
//!  * `server`   – the `ChatServer` service object
//!  * `gateway`  – TCP front end speaking length-prefixed frames
//!  * `config`   – TOML-driven runtime configuration

// ───────────────────────────────────────────────────────────
// Public modules
// ───────────────────────────────────────────────────────────
pub mod adapters;
pub mod config;
pub mod core;
pub mod gateway;
pub mod logging;
pub mod server;

// ───────────────────────────────────────────────────────────
// Re-exports
// ───────────────────────────────────────────────────────────
pub use config::{load_config, Config, MessageMode};
pub use core::error::{ChatError, Result};
pub use gateway::serve;
pub use server::{ChannelStatus, ChatServer, Collaborators};
