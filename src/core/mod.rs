pub mod envelope;
pub mod error;
pub mod history;
pub mod load_monitor;
pub mod message;
pub mod offload;
pub mod pipeline;
pub mod queue;
pub mod session;
pub mod shutdown;
pub mod transport;
