use bytes::Bytes;
use flume::{Sender, TrySendError};
use std::borrow::Borrow;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::adapters::connection::Connection;
use crate::core::error::{ChatError, Result};

/// Identity a client logged in under; its user id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub String);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        SessionId(s.to_owned())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        SessionId(s)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for SessionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl Deref for SessionId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// One frame queued for a session's writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    /// Message uuid or task id the frame belongs to; empty for notices.
    pub id: String,
    pub payload: Bytes,
}

impl OutboundFrame {
    pub fn new(id: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            id: id.into(),
            payload: payload.into(),
        }
    }

    /// A plain-text server notice such as the welcome line.
    pub fn notice(text: &'static str) -> Self {
        Self {
            id: String::new(),
            payload: Bytes::from_static(text.as_bytes()),
        }
    }
}

/// Raised by a writer whose connection stopped accepting frames.
#[derive(Debug, Clone)]
pub struct Disconnected {
    pub id: SessionId,
    pub connection: Arc<dyn Connection>,
}

/// A registered client: its connection plus the bounded outbound queue that
/// feeds it.
///
/// Opening a session spawns the writer pump. The pump exits once every
/// sender is dropped and the queue has been flushed, or on the first write
/// error. A write error is reported on `disconnects` when one is given.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    connection: Arc<dyn Connection>,
    outbound: Sender<OutboundFrame>,
}

impl Session {
    pub fn open(
        id: SessionId,
        connection: Arc<dyn Connection>,
        capacity: usize,
        disconnects: Option<flume::Sender<Disconnected>>,
    ) -> Self {
        let (tx, rx) = flume::bounded::<OutboundFrame>(capacity.max(1));

        let pump_id = id.clone();
        let pump_conn = Arc::clone(&connection);
        tokio::spawn(async move {
            while let Ok(frame) = rx.recv_async().await {
                if let Err(e) = pump_conn.write_frame(frame.payload).await {
                    warn!(session = %pump_id, error = %e, "outbound write failed; stopping writer");
                    if let Some(tx) = disconnects {
                        let _ = tx.send(Disconnected {
                            id: pump_id,
                            connection: pump_conn,
                        });
                    }
                    return;
                }
            }
            debug!(session = %pump_id, "writer drained");
        });

        Self {
            id,
            connection,
            outbound: tx,
        }
    }

    #[inline]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    #[inline]
    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    /// Number of frames waiting for the writer.
    pub fn pending(&self) -> usize {
        self.outbound.len()
    }

    /// Queues a frame without waiting. A full queue means a slow client; the
    /// frame is dropped for that client only.
    pub fn try_deliver(&self, frame: OutboundFrame) -> Result<()> {
        self.outbound.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => ChatError::QueueFull,
            TrySendError::Disconnected(_) => ChatError::QueueClosed,
        })
    }
}
