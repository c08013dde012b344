use bytes::Bytes;
use flume::{Receiver, Sender, TryRecvError, TrySendError};

use crate::core::error::{ChatError, Result};

/// Bounded in-memory FIFO of encoded chat envelopes.
///
/// Cloning yields another handle onto the same queue. Pushing never blocks;
/// a full queue rejects the item.
#[derive(Debug, Clone)]
pub struct LocalQueue {
    tx: Sender<Bytes>,
    rx: Receiver<Bytes>,
    capacity: usize,
}

impl LocalQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = flume::bounded(capacity);
        Self { tx, rx, capacity }
    }

    pub fn try_push(&self, item: Bytes) -> Result<()> {
        self.tx.try_send(item).map_err(|e| match e {
            TrySendError::Full(_) => ChatError::QueueFull,
            TrySendError::Disconnected(_) => ChatError::QueueClosed,
        })
    }

    pub fn try_pop(&self) -> Option<Bytes> {
        match self.rx.try_recv() {
            Ok(item) => Some(item),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Waits for the next item.
    pub async fn pop(&self) -> Result<Bytes> {
        self.rx.recv_async().await.map_err(|_| ChatError::QueueClosed)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
