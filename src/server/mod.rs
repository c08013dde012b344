//! The chat service object and its router loop.

mod router;
pub mod service;

pub use service::{ChannelStatus, ChatServer, Collaborators};
