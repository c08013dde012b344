use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::adapters::cache::{Cache, MemoryCache};
use crate::adapters::connection::Connection;
use crate::adapters::durable_log::{DurableLog, MemoryLog};
use crate::adapters::persistence::{MemoryStore, Persistence};
use crate::config::{Config, MessageMode};
use crate::core::error::{ChatError, Result};
use crate::core::history::MessageHistory;
use crate::core::load_monitor::{LoadMonitor, LoadSignal};
use crate::core::offload::{AsyncReply, OffloadRequester, OffloadWorker, TaskParams};
use crate::core::pipeline::FanOut;
use crate::core::queue::LocalQueue;
use crate::core::session::{Disconnected, SessionId, SessionRegistry};
use crate::core::shutdown::{join_within, stopped, Shutdown};
use crate::core::transport::{Route, TransportMode, TransportStats, TransportSwitch};
use crate::server::router::{forward_broker, Control, Router};

const CONTROL_CAPACITY: usize = 1024;
const BROKER_FORWARD_CAPACITY: usize = 1024;
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// External systems the server talks to.
#[derive(Debug, Clone)]
pub struct Collaborators {
    pub log: Arc<dyn DurableLog>,
    pub cache: Arc<dyn Cache>,
    pub persistence: Arc<dyn Persistence>,
}

impl Collaborators {
    /// Everything in-process; used by standalone mode and tests.
    pub fn in_memory() -> Self {
        Self {
            log: Arc::new(MemoryLog::new()),
            cache: Arc::new(MemoryCache::new()),
            persistence: Arc::new(MemoryStore::new()),
        }
    }
}

/// Load and transport snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelStatus {
    pub current_load: usize,
    pub capacity: usize,
    pub load_percentage: f64,
    pub is_overloaded: bool,
    pub threshold_ratio: f64,
    pub mode: TransportMode,
    pub message_mode: MessageMode,
    /// Present while occupancy is above the threshold.
    pub overload_duration_secs: Option<f64>,
    pub online_sessions: usize,
    pub stats: TransportStats,
}

/// Receivers handed to the workers on `start`.
struct Pending {
    control: mpsc::Receiver<Control>,
    disconnects: flume::Receiver<Disconnected>,
    broker_tx: mpsc::Sender<Bytes>,
    broker_rx: mpsc::Receiver<Bytes>,
}

/// The chat routing service.
///
/// Construct with [`ChatServer::new`], then [`start`](ChatServer::start) its
/// workers inside a tokio runtime. Connection layers call the `on_*` methods.
pub struct ChatServer {
    config: Config,
    collaborators: Collaborators,
    registry: Arc<SessionRegistry>,
    transport: Arc<TransportSwitch>,
    monitor: Arc<LoadMonitor>,
    history: Arc<MessageHistory>,
    fanout: FanOut,
    requester: OffloadRequester,
    worker: Arc<OffloadWorker>,
    control: mpsc::Sender<Control>,
    pending: Mutex<Option<Pending>>,
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
    shutdown: Shutdown,
    accepting: AtomicBool,
}

impl std::fmt::Debug for ChatServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatServer")
            .field("message_mode", &self.config.transport.message_mode)
            .field("mode", &self.transport.mode())
            .field("sessions", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl ChatServer {
    pub fn new(config: Config, collaborators: Collaborators) -> Self {
        let tc = &config.transport;

        let (registry, disconnects) =
            SessionRegistry::with_disconnects(config.session.outbound_capacity);
        let registry = Arc::new(registry);
        let queue = LocalQueue::new(tc.queue_capacity);
        let transport = Arc::new(TransportSwitch::new(
            tc.message_mode,
            queue,
            Arc::clone(&collaborators.log),
            &config.broker,
            tc.publish_timeout(),
        ));
        let monitor = Arc::new(LoadMonitor::new(
            tc.threshold_ratio,
            tc.monitor_interval(),
            tc.sustain_duration(),
        ));
        let history = Arc::new(MessageHistory::new(
            Arc::clone(&collaborators.persistence),
            Arc::clone(&collaborators.cache),
            config.cache.history_ttl(),
        ));
        let fanout = FanOut::new(
            Arc::clone(&registry),
            Arc::clone(&collaborators.persistence),
            Arc::clone(&history),
        );

        // Channel mode has no broker; reads are always answered inline.
        let offload_log = tc
            .message_mode
            .uses_broker()
            .then(|| Arc::clone(&collaborators.log));
        let requester = OffloadRequester::new(
            offload_log,
            config.broker.async_task_topic.clone(),
            tc.publish_timeout(),
            Arc::clone(&history),
        );
        let worker = Arc::new(OffloadWorker::with_history(
            Arc::clone(&registry),
            Arc::clone(&history),
        ));

        let (control_tx, control_rx) = mpsc::channel(CONTROL_CAPACITY);
        let (broker_tx, broker_rx) = mpsc::channel(BROKER_FORWARD_CAPACITY);

        Self {
            config,
            collaborators,
            registry,
            transport,
            monitor,
            history,
            fanout,
            requester,
            worker,
            control: control_tx,
            pending: Mutex::new(Some(Pending {
                control: control_rx,
                disconnects,
                broker_tx,
                broker_rx,
            })),
            tasks: Mutex::new(Vec::new()),
            shutdown: Shutdown::new(),
            accepting: AtomicBool::new(true),
        }
    }

    /// Spawns the router, the load monitor and, when a broker is in use, the
    /// chat consumer and the offload worker. Calling it twice is a no-op.
    ///
    /// Fails with [`ChatError::Config`] when the configuration is invalid.
    pub fn start(&self) -> Result<()> {
        if self.shutdown.is_triggered() {
            return Err(ChatError::ShuttingDown);
        }
        self.config.validate()?;
        let Some(pending) = self.pending.lock().take() else {
            warn!("chat server already started");
            return Ok(());
        };
        let mode = self.config.transport.message_mode;
        let mut tasks = Vec::with_capacity(4);

        let router = Router {
            registry: Arc::clone(&self.registry),
            fanout: self.fanout.clone(),
            queue: self.transport.queue().clone(),
            control: pending.control,
            disconnects: pending.disconnects,
            broker: pending.broker_rx,
            shutdown: self.shutdown.subscribe(),
        };
        tasks.push(("router", tokio::spawn(router.run())));

        tasks.push(("load-monitor", self.spawn_monitor()));

        if mode.uses_broker() {
            let log = Arc::clone(&self.collaborators.log);
            let broker = self.config.broker.clone();
            let tx = pending.broker_tx;
            let shutdown = self.shutdown.subscribe();
            tasks.push((
                "chat-consumer",
                tokio::spawn(async move {
                    match log.consume(&broker.chat_topic, &broker.chat_group).await {
                        Ok(records) => forward_broker(records, tx, shutdown).await,
                        Err(e) => error!(topic = %broker.chat_topic, error = %e, "chat consumer failed to start"),
                    }
                }),
            ));

            let log = Arc::clone(&self.collaborators.log);
            let broker = self.config.broker.clone();
            let worker = Arc::clone(&self.worker);
            let shutdown = self.shutdown.subscribe();
            tasks.push((
                "offload-worker",
                tokio::spawn(async move {
                    match log
                        .consume(&broker.async_task_topic, &broker.async_task_group)
                        .await
                    {
                        Ok(records) => worker.run(records, shutdown).await,
                        Err(e) => error!(topic = %broker.async_task_topic, error = %e, "offload worker failed to start"),
                    }
                }),
            ));
        }

        self.tasks.lock().extend(tasks);
        info!(
            message_mode = %mode,
            queue_capacity = self.transport.queue().capacity(),
            threshold_ratio = self.monitor.threshold_ratio(),
            "chat server started"
        );
        Ok(())
    }

    fn spawn_monitor(&self) -> JoinHandle<()> {
        let transport = Arc::clone(&self.transport);
        let monitor = Arc::clone(&self.monitor);
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor.check_interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = stopped(&mut shutdown) => break,
                    _ = ticker.tick() => {
                        check_load(&transport, &monitor, Instant::now());
                    }
                }
            }
        })
    }

    /// Stops accepting work, stops every worker, says goodbye to every session
    /// and closes the broker. Idempotent.
    pub async fn stop(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        if !self.shutdown.trigger() {
            return;
        }
        info!("stopping chat server");

        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock());
        for (name, handle) in tasks {
            join_within(name, handle, STOP_TIMEOUT).await;
        }

        let drained = self.registry.drain();
        info!(sessions = drained, "sessions drained");

        if let Err(e) = self.collaborators.log.close().await {
            warn!(error = %e, "broker close failed");
        }
        info!(
            undelivered = self.transport.queue().len(),
            "chat server stopped"
        );
    }

    fn ensure_accepting(&self) -> Result<()> {
        if self.accepting.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ChatError::ShuttingDown)
        }
    }

    pub async fn on_login(
        &self,
        session_id: impl Into<SessionId>,
        connection: Arc<dyn Connection>,
    ) -> Result<()> {
        self.ensure_accepting()?;
        self.control
            .send(Control::Login(session_id.into(), connection))
            .await
            .map_err(|_| ChatError::ShuttingDown)
    }

    /// Explicit logout: removes whatever session is registered under the id.
    pub async fn on_logout(&self, session_id: impl Into<SessionId>) -> Result<()> {
        self.ensure_accepting()?;
        self.control
            .send(Control::Logout(session_id.into(), None))
            .await
            .map_err(|_| ChatError::ShuttingDown)
    }

    /// Connection loss: removes the session only if `connection` is still the
    /// one registered, so a newer login under the same id survives.
    pub async fn on_disconnect(
        &self,
        session_id: impl Into<SessionId>,
        connection: Arc<dyn Connection>,
    ) -> Result<()> {
        self.ensure_accepting()?;
        self.control
            .send(Control::Logout(session_id.into(), Some(connection)))
            .await
            .map_err(|_| ChatError::ShuttingDown)
    }

    /// Hands an encoded envelope to the transport. Decoding happens in the
    /// router, so malformed envelopes are accepted here and dropped there.
    pub async fn on_inbound_message(&self, envelope: impl Into<Bytes>) -> Result<Route> {
        self.ensure_accepting()?;
        self.transport.send(envelope.into()).await
    }

    /// Requests a list read on behalf of `client_id`.
    pub async fn send_async(&self, params: TaskParams, client_id: &str) -> Result<AsyncReply> {
        self.ensure_accepting()?;
        self.requester.request(params, client_id).await
    }

    /// Runs one load-monitor sample at `now`. The monitor task calls this on
    /// every tick.
    pub fn check_load_at(&self, now: Instant) -> LoadSignal {
        check_load(&self.transport, &self.monitor, now)
    }

    pub fn channel_status(&self) -> ChannelStatus {
        let queue = self.transport.queue();
        let current_load = queue.len();
        let capacity = queue.capacity();
        let snapshot = self.monitor.snapshot(Instant::now());
        ChannelStatus {
            current_load,
            capacity,
            load_percentage: current_load as f64 * 100.0 / capacity as f64,
            is_overloaded: snapshot.is_overloaded,
            threshold_ratio: snapshot.threshold_ratio,
            mode: self.transport.mode(),
            message_mode: self.transport.policy(),
            overload_duration_secs: snapshot.breach_duration.map(|d| d.as_secs_f64()),
            online_sessions: self.registry.len(),
            stats: self.transport.stats(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn transport(&self) -> &Arc<TransportSwitch> {
        &self.transport
    }

    pub fn history(&self) -> &Arc<MessageHistory> {
        &self.history
    }
}

fn check_load(transport: &Arc<TransportSwitch>, monitor: &LoadMonitor, now: Instant) -> LoadSignal {
    let queue = transport.queue();
    let signal = monitor.tick(queue.len(), queue.capacity(), now);
    if let Some((mode, _drain)) = transport.apply(signal) {
        info!(?mode, ?signal, "transport mode changed");
    }
    signal
}
