//! The single event loop that owns registry mutation and envelope processing.

use bytes::Bytes;
use futures::{FutureExt, StreamExt};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::adapters::connection::Connection;
use crate::adapters::durable_log::LogStream;
use crate::core::pipeline::FanOut;
use crate::core::queue::LocalQueue;
use crate::core::session::{Disconnected, SessionId, SessionRegistry};
use crate::core::shutdown::stopped;

/// Session lifecycle events. One channel carries both so a login and the
/// logout that follows it are seen in order.
#[derive(Debug)]
pub(crate) enum Control {
    Login(SessionId, Arc<dyn Connection>),
    /// With a connection, only that connection's session is removed.
    Logout(SessionId, Option<Arc<dyn Connection>>),
}

pub(crate) struct Router {
    pub(crate) registry: Arc<SessionRegistry>,
    pub(crate) fanout: FanOut,
    pub(crate) queue: LocalQueue,
    pub(crate) control: mpsc::Receiver<Control>,
    pub(crate) disconnects: flume::Receiver<Disconnected>,
    pub(crate) broker: mpsc::Receiver<Bytes>,
    pub(crate) shutdown: watch::Receiver<bool>,
}

impl Router {
    pub(crate) async fn run(mut self) {
        info!(target: "hybridchat::router", "router started");
        loop {
            tokio::select! {
                // Lifecycle first so a fresh login is registered before
                // traffic queued behind it is routed.
                biased;
                _ = stopped(&mut self.shutdown) => break,
                Some(event) = self.control.recv() => self.on_control(event),
                Ok(gone) = self.disconnects.recv_async() => {
                    self.registry.unregister_connection(&gone.id, &gone.connection);
                }
                Ok(envelope) = self.queue.pop() => self.dispatch(envelope, "queue").await,
                Some(envelope) = self.broker.recv() => self.dispatch(envelope, "broker").await,
            }
        }
        info!(target: "hybridchat::router", backlog = self.queue.len(), "router stopped");
    }

    fn on_control(&self, event: Control) {
        match event {
            Control::Login(id, connection) => {
                self.registry.register(id, connection);
            }
            Control::Logout(id, None) => {
                self.registry.unregister(&id);
            }
            Control::Logout(id, Some(connection)) => {
                self.registry.unregister_connection(&id, &connection);
            }
        }
    }

    /// Processes one envelope. Failures, panics included, are contained to it.
    async fn dispatch(&self, envelope: Bytes, source: &'static str) {
        let outcome = AssertUnwindSafe(self.fanout.process(&envelope))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(delivery)) => {
                debug!(target: "hybridchat::router", source, ?delivery, "envelope routed")
            }
            Ok(Err(e)) => {
                warn!(target: "hybridchat::router", source, error = %e, "envelope dropped")
            }
            Err(_) => {
                error!(target: "hybridchat::router", source, "envelope processing panicked; continuing")
            }
        }
    }
}

/// Feeds the chat topic's records into the router's broker channel.
pub(crate) async fn forward_broker(
    mut records: LogStream,
    tx: mpsc::Sender<Bytes>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(target: "hybridchat::router", "broker consumer started");
    loop {
        tokio::select! {
            _ = stopped(&mut shutdown) => break,
            next = records.next() => match next {
                Some(Ok(record)) => {
                    if tx.send(record.value).await.is_err() {
                        break;
                    }
                }
                Some(Err(e)) => warn!(target: "hybridchat::router", error = %e, "chat topic read failed"),
                None => break,
            },
        }
    }
    info!(target: "hybridchat::router", "broker consumer stopped");
}
