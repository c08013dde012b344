use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::adapters::connection::Connection;
use crate::core::session::session::{Disconnected, OutboundFrame, Session, SessionId};

pub const WELCOME_NOTICE: &str = "welcome to hybridchat";
pub const GOODBYE_NOTICE: &str = "you have been logged out";

/// Live sessions keyed by user id.
///
/// Written only by the router; read by fan-out and the offload worker. Lookups
/// take the read lock, so delivery never waits behind another delivery.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Session>>,
    outbound_capacity: usize,
    disconnects: Option<flume::Sender<Disconnected>>,
}

impl SessionRegistry {
    pub fn new(outbound_capacity: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            outbound_capacity,
            disconnects: None,
        }
    }

    /// Like [`new`](Self::new), but writers whose connection fails report it
    /// on the returned receiver.
    pub fn with_disconnects(outbound_capacity: usize) -> (Self, flume::Receiver<Disconnected>) {
        let (tx, rx) = flume::unbounded();
        let registry = Self {
            sessions: RwLock::new(HashMap::new()),
            outbound_capacity,
            disconnects: Some(tx),
        };
        (registry, rx)
    }

    /// Registers a connection under `id` and greets it.
    ///
    /// A second login under the same id replaces the first one (last login
    /// wins); the replaced session is returned and its writer winds down once
    /// it is dropped.
    pub fn register(&self, id: SessionId, connection: Arc<dyn Connection>) -> Option<Session> {
        let session = Session::open(
            id.clone(),
            connection,
            self.outbound_capacity,
            self.disconnects.clone(),
        );
        if let Err(e) = session.try_deliver(OutboundFrame::notice(WELCOME_NOTICE)) {
            warn!(session = %id, error = %e, "welcome notice not queued");
        }

        let replaced = self.sessions.write().insert(id.clone(), session);
        match &replaced {
            Some(_) => info!(session = %id, "session re-registered; previous connection replaced"),
            None => info!(session = %id, "session registered"),
        }
        replaced
    }

    /// Removes the session and sends it a goodbye. Unknown ids are a no-op.
    pub fn unregister(&self, id: &str) -> bool {
        let removed = self.sessions.write().remove(id);
        match removed {
            Some(session) => {
                farewell(&session);
                info!(session = %id, "session unregistered");
                true
            }
            None => {
                debug!(session = %id, "logout for unknown session ignored");
                false
            }
        }
    }

    /// Removes the session only while `connection` is still the one registered
    /// under `id`. A disconnect from a connection that a newer login replaced
    /// leaves the newer session alone.
    pub fn unregister_connection(&self, id: &str, connection: &Arc<dyn Connection>) -> bool {
        let removed = {
            let mut sessions = self.sessions.write();
            let matches = sessions
                .get(id)
                .map(|current| same_connection(current.connection(), connection));
            match matches {
                Some(true) => sessions.remove(id),
                Some(false) => {
                    debug!(session = %id, "disconnect of a replaced connection ignored");
                    return false;
                }
                None => None,
            }
        };
        match removed {
            Some(session) => {
                farewell(&session);
                info!(session = %id, "session unregistered after disconnect");
                true
            }
            None => {
                debug!(session = %id, "disconnect for unknown session ignored");
                false
            }
        }
    }

    pub fn lookup(&self, id: &str) -> Option<Arc<dyn Connection>> {
        self.sessions
            .read()
            .get(id)
            .map(|s| Arc::clone(s.connection()))
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.sessions.read().contains_key(id)
    }

    /// Queues a frame for one session. Returns whether it was accepted.
    pub fn deliver(&self, id: &str, frame: OutboundFrame) -> bool {
        let sessions = self.sessions.read();
        match sessions.get(id) {
            Some(session) => enqueue(session, frame),
            None => false,
        }
    }

    /// Queues the same frame for every registered id in `ids`, under a single
    /// read lock. Unregistered ids are skipped. Returns the number accepted.
    pub fn deliver_many<S: AsRef<str>>(&self, ids: &[S], frame: &OutboundFrame) -> usize {
        let sessions = self.sessions.read();
        ids.iter()
            .filter_map(|id| sessions.get(id.as_ref()))
            .filter(|session| enqueue(session, frame.clone()))
            .count()
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Unregisters every session with a goodbye. Used on shutdown.
    pub fn drain(&self) -> usize {
        let drained: Vec<Session> = self.sessions.write().drain().map(|(_, s)| s).collect();
        for session in &drained {
            farewell(session);
        }
        drained.len()
    }
}

fn enqueue(session: &Session, frame: OutboundFrame) -> bool {
    match session.try_deliver(frame) {
        Ok(()) => true,
        Err(e) => {
            warn!(session = %session.id(), error = %e, "frame dropped for slow client");
            false
        }
    }
}

fn same_connection(a: &Arc<dyn Connection>, b: &Arc<dyn Connection>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

fn farewell(session: &Session) {
    if let Err(e) = session.try_deliver(OutboundFrame::notice(GOODBYE_NOTICE)) {
        debug!(session = %session.id(), error = %e, "goodbye notice not queued");
    }
}
