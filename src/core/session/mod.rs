//! Online sessions and their outbound queues.

pub mod registry;
#[allow(clippy::module_inception)]
pub mod session;

pub use registry::{SessionRegistry, GOODBYE_NOTICE, WELCOME_NOTICE};
pub use session::{Disconnected, OutboundFrame, Session, SessionId};
