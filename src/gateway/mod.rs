pub mod server;

pub use server::{serve, serve_listener};
