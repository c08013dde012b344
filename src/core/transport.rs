//! Routing of inbound envelopes onto the local queue or the durable broker.

use bytes::Bytes;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::adapters::durable_log::DurableLog;
use crate::config::{BrokerConfig, MessageMode};
use crate::core::error::{ChatError, Result};
use crate::core::load_monitor::LoadSignal;
use crate::core::queue::LocalQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    Queue,
    Broker,
}

/// Where an accepted envelope went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Queue,
    Broker,
    /// Broker publish failed; the envelope was queued locally instead.
    Fallback,
}

/// Monotonic counters of the send and drain paths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransportStats {
    pub queued: u64,
    pub published: u64,
    pub fallbacks: u64,
    pub dropped: u64,
    pub drained: u64,
    pub lost: u64,
}

#[derive(Debug, Default)]
struct Counters {
    queued: AtomicU64,
    published: AtomicU64,
    fallbacks: AtomicU64,
    dropped: AtomicU64,
    drained: AtomicU64,
    lost: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Owns the current transport mode and the send path.
///
/// `policy` pins the mode for `channel` and `broker` deployments; only
/// `hybrid` follows the load monitor.
#[derive(Debug)]
pub struct TransportSwitch {
    policy: MessageMode,
    mode: RwLock<TransportMode>,
    queue: LocalQueue,
    log: Arc<dyn DurableLog>,
    topic: String,
    key: Bytes,
    publish_timeout: Duration,
    counters: Counters,
}

impl TransportSwitch {
    pub fn new(
        policy: MessageMode,
        queue: LocalQueue,
        log: Arc<dyn DurableLog>,
        broker: &BrokerConfig,
        publish_timeout: Duration,
    ) -> Self {
        let initial = match policy {
            MessageMode::Broker => TransportMode::Broker,
            MessageMode::Channel | MessageMode::Hybrid => TransportMode::Queue,
        };
        Self {
            policy,
            mode: RwLock::new(initial),
            queue,
            log,
            topic: broker.chat_topic.clone(),
            key: Bytes::from(broker.partition_key.clone()),
            publish_timeout,
            counters: Counters::default(),
        }
    }

    #[inline]
    pub fn mode(&self) -> TransportMode {
        *self.mode.read()
    }

    #[inline]
    pub fn policy(&self) -> MessageMode {
        self.policy
    }

    #[inline]
    pub fn queue(&self) -> &LocalQueue {
        &self.queue
    }

    pub fn stats(&self) -> TransportStats {
        let c = &self.counters;
        TransportStats {
            queued: c.queued.load(Ordering::Relaxed),
            published: c.published.load(Ordering::Relaxed),
            fallbacks: c.fallbacks.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            drained: c.drained.load(Ordering::Relaxed),
            lost: c.lost.load(Ordering::Relaxed),
        }
    }

    /// Routes one encoded envelope according to the current mode.
    ///
    /// In broker mode a failed publish falls back to the local queue. A full
    /// local queue drops the envelope and reports [`ChatError::QueueFull`].
    pub async fn send(&self, envelope: Bytes) -> Result<Route> {
        match self.mode() {
            TransportMode::Queue => {
                self.enqueue(envelope)?;
                Ok(Route::Queue)
            }
            TransportMode::Broker => match self.publish(envelope.clone()).await {
                Ok(()) => {
                    Counters::bump(&self.counters.published);
                    Ok(Route::Broker)
                }
                Err(e) => {
                    warn!(topic = %self.topic, error = %e, "broker publish failed; falling back to local queue");
                    Counters::bump(&self.counters.fallbacks);
                    self.enqueue(envelope)?;
                    Ok(Route::Fallback)
                }
            },
        }
    }

    fn enqueue(&self, envelope: Bytes) -> Result<()> {
        match self.queue.try_push(envelope) {
            Ok(()) => {
                Counters::bump(&self.counters.queued);
                Ok(())
            }
            Err(e) => {
                Counters::bump(&self.counters.dropped);
                warn!(
                    capacity = self.queue.capacity(),
                    error = %e,
                    "local queue rejected envelope; dropped"
                );
                Err(e)
            }
        }
    }

    async fn publish(&self, value: Bytes) -> Result<()> {
        tokio::time::timeout(
            self.publish_timeout,
            self.log.publish(&self.topic, &self.key, value),
        )
        .await
        .map_err(|_| ChatError::Timeout)?
    }

    /// Reacts to a monitor sample. Returns the new mode if it changed, plus the
    /// drain task spawned by a switch to the broker.
    pub fn apply(self: &Arc<Self>, signal: LoadSignal) -> Option<(TransportMode, Option<JoinHandle<usize>>)> {
        match signal {
            LoadSignal::Sustained => self
                .switch_to_broker()
                .map(|drain| (TransportMode::Broker, Some(drain))),
            LoadSignal::Recovered => self.switch_to_queue().then_some((TransportMode::Queue, None)),
            LoadSignal::Normal | LoadSignal::Rising => None,
        }
    }

    /// Switches to broker mode and spawns the drain of whatever the local
    /// queue holds at that moment. `None` if already there or pinned to
    /// channel mode.
    pub fn switch_to_broker(self: &Arc<Self>) -> Option<JoinHandle<usize>> {
        if self.policy == MessageMode::Channel {
            return None;
        }
        {
            let mut mode = self.mode.write();
            if *mode == TransportMode::Broker {
                return None;
            }
            *mode = TransportMode::Broker;
        }
        info!(backlog = self.queue.len(), "switched to broker transport");

        let this = Arc::clone(self);
        Some(tokio::spawn(async move { this.drain_to_broker().await }))
    }

    /// Switches back to the local queue. Broker-pinned deployments stay put.
    pub fn switch_to_queue(&self) -> bool {
        if self.policy != MessageMode::Hybrid {
            return false;
        }
        let mut mode = self.mode.write();
        if *mode == TransportMode::Queue {
            return false;
        }
        *mode = TransportMode::Queue;
        info!("switched back to local queue transport");
        true
    }

    /// Moves the current backlog of the local queue onto the broker.
    ///
    /// Bounded by the backlog seen at entry, so items enqueued meanwhile are
    /// left for the router. The first publish failure requeues its item and
    /// ends the drain; the rest stay in the queue.
    pub async fn drain_to_broker(&self) -> usize {
        let backlog = self.queue.len();
        let mut moved = 0;

        for _ in 0..backlog {
            let Some(item) = self.queue.try_pop() else {
                break;
            };
            match self.publish(item.clone()).await {
                Ok(()) => {
                    moved += 1;
                    Counters::bump(&self.counters.drained);
                }
                Err(e) => {
                    warn!(error = %e, moved, "drain publish failed; returning item to local queue");
                    if self.queue.try_push(item).is_err() {
                        Counters::bump(&self.counters.lost);
                        error!("local queue full while requeueing drained item; item lost");
                    }
                    break;
                }
            }
        }

        debug!(backlog, moved, "local queue drain finished");
        moved
    }
}
