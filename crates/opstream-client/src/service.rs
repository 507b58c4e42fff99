use crate::config::ClientConfig;
use crate::connection::{ConnectionEvent, ConnectionManager};
use crate::dispatch::EventDispatcher;
use crate::notify::NotificationSink;
use crate::scheduler::{ReconnectOrigin, ReconnectRequest, ReconnectionScheduler};
use crate::transport::Transport;
use crate::{lock_ledger, SharedLedger};
use opstream_core::ledger::{CloseOutcome, Ledger, RecordSpec};
use opstream_core::RecordKey;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const COMMAND_QUEUE_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("stream client has been disposed")]
    Disposed,
    #[error("stream task failed: {0}")]
    TaskFailed(String),
}

/// Identifies a request issued from this session. `ref_id` is what the
/// server echoes back in `start`/`msg`/`end` events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTicket {
    pub key: RecordKey,
    pub ref_id: String,
}

enum Command {
    Reconnect {
        request: ReconnectRequest,
        reply: oneshot::Sender<()>,
    },
    Dispose,
}

pub struct StreamClient<T, L, N> {
    config: ClientConfig,
    transport: T,
    ledger: SharedLedger<L>,
    notifier: N,
}

impl<T, L, N> StreamClient<T, L, N>
where
    T: Transport,
    L: Ledger + Send + 'static,
    N: NotificationSink,
{
    pub fn new(config: ClientConfig, transport: T, ledger: SharedLedger<L>, notifier: N) -> Self {
        Self {
            config,
            transport,
            ledger,
            notifier,
        }
    }

    /// Spawns the stream task and opens the first connection.
    pub fn start(self) -> ClientHandle<L> {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let (connected_tx, connected_rx) = watch::channel(false);
        let scheduler = ReconnectionScheduler::new(self.config.retry_delay);
        let reconnecting = scheduler.subscribe();
        let service = StreamService {
            connection: ConnectionManager::new(self.transport),
            scheduler,
            dispatcher: EventDispatcher::new(
                self.ledger.clone(),
                self.notifier,
                self.config.watchdog_window,
            ),
            commands: command_rx,
            connected_tx,
            waiters: Vec::new(),
            endpoint: self.config.endpoint.to_string(),
            attempt_timeout: self.config.watchdog_window,
        };
        let task = tokio::spawn(service.run());
        ClientHandle {
            command_tx,
            reconnecting,
            connected: connected_rx,
            ledger: self.ledger,
            task,
        }
    }
}

/// Caller-side view of a running stream client.
pub struct ClientHandle<L> {
    command_tx: mpsc::Sender<Command>,
    reconnecting: watch::Receiver<Option<ReconnectOrigin>>,
    connected: watch::Receiver<bool>,
    ledger: SharedLedger<L>,
    task: JoinHandle<()>,
}

impl<L: Ledger> ClientHandle<L> {
    /// Requests a reconnection and resolves once the stream is open again.
    /// Concurrent callers all resolve on the same successful connection.
    pub async fn reconnect(&self, request: ReconnectRequest) -> Result<(), ClientError> {
        let (reply, done) = oneshot::channel();
        self.command_tx
            .send(Command::Reconnect { request, reply })
            .await
            .map_err(|_| ClientError::Disposed)?;
        done.await.map_err(|_| ClientError::Disposed)
    }

    /// `Some(origin)` while a reconnection is in progress.
    pub fn reconnecting(&self) -> watch::Receiver<Option<ReconnectOrigin>> {
        self.reconnecting.clone()
    }

    pub fn reconnect_origin(&self) -> Option<ReconnectOrigin> {
        *self.reconnecting.borrow()
    }

    pub fn connected(&self) -> bool {
        *self.connected.borrow()
    }

    pub async fn wait_connected(&self) -> Result<(), ClientError> {
        let mut connected = self.connected.clone();
        connected
            .wait_for(|connected| *connected)
            .await
            .map(|_| ())
            .map_err(|_| ClientError::Disposed)
    }

    /// Records a request issued from this session before it is sent.
    pub fn start_request(&self, title: impl Into<String>) -> RequestTicket {
        let spec = RecordSpec::request(title);
        let ref_id = spec.id.clone();
        let key = lock_ledger(&self.ledger).create(spec);
        debug!(event = "request_started", record = %key, ref_id = %ref_id);
        RequestTicket { key, ref_id }
    }

    /// Closes a request record. Returns false if it was unknown or already
    /// closed.
    pub fn end_request(&self, key: RecordKey, outcome: CloseOutcome) -> bool {
        lock_ledger(&self.ledger).close(key, outcome)
    }

    pub fn ledger(&self) -> SharedLedger<L> {
        self.ledger.clone()
    }

    pub fn with_ledger<R>(&self, read: impl FnOnce(&L) -> R) -> R {
        let ledger = lock_ledger(&self.ledger);
        read(&*ledger)
    }

    /// Cancels the pending timer, closes the connection and stops the task.
    /// Outstanding `reconnect` futures fail with `ClientError::Disposed`.
    pub async fn dispose(self) -> Result<(), ClientError> {
        let _ = self.command_tx.send(Command::Dispose).await;
        self.task
            .await
            .map_err(|err| ClientError::TaskFailed(err.to_string()))
    }
}

struct StreamService<T, L, N> {
    connection: ConnectionManager<T>,
    scheduler: ReconnectionScheduler,
    dispatcher: EventDispatcher<L, N>,
    commands: mpsc::Receiver<Command>,
    connected_tx: watch::Sender<bool>,
    waiters: Vec<oneshot::Sender<()>>,
    endpoint: String,
    attempt_timeout: Duration,
}

impl<T, L, N> StreamService<T, L, N>
where
    T: Transport,
    L: Ledger + Send + 'static,
    N: NotificationSink,
{
    async fn run(mut self) {
        self.begin_attempt(Instant::now());
        loop {
            self.publish_connected();
            let deadline = self.scheduler.deadline();
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Reconnect { request, reply }) => {
                        self.waiters.push(reply);
                        info!(event = "reconnect_requested", origin = %request.origin);
                        let now = Instant::now();
                        if self.scheduler.schedule(request, now) {
                            self.begin_attempt(now);
                        }
                    }
                    Some(Command::Dispose) | None => break,
                },
                event = self.connection.next_event() => self.on_connection_event(event),
                _ = sleep_until(deadline) => {
                    let now = Instant::now();
                    if self.scheduler.fire(now) {
                        if let Some(descriptor) = self.scheduler.descriptor() {
                            info!(event = "reconnect_timer_fired", origin = %descriptor.origin);
                        }
                        self.begin_attempt(now);
                    }
                }
            }
        }
        self.connection.close();
        self.scheduler.reset();
        self.waiters.clear();
        self.connected_tx.send_if_modified(|connected| {
            std::mem::replace(connected, false)
        });
        info!(event = "stream_disposed", endpoint = %self.endpoint);
    }

    fn begin_attempt(&mut self, now: Instant) {
        self.scheduler.attempt_started(now, self.attempt_timeout);
        match self.connection.open() {
            Ok(()) => debug!(event = "stream_connecting", endpoint = %self.endpoint),
            Err(err) => {
                warn!(event = "stream_connect_error", endpoint = %self.endpoint, error = %err);
                self.scheduler.attempt_failed(now);
            }
        }
    }

    fn on_connection_event(&mut self, event: ConnectionEvent) {
        let now = Instant::now();
        match event {
            ConnectionEvent::Opened => {
                info!(event = "stream_open", endpoint = %self.endpoint);
                self.scheduler.attempt_succeeded();
                self.dispatcher.arm_watchdog(&mut self.scheduler, now);
                for waiter in self.waiters.drain(..) {
                    let _ = waiter.send(());
                }
            }
            ConnectionEvent::Message(raw) => {
                self.dispatcher.dispatch(&mut self.scheduler, &raw, now);
            }
            ConnectionEvent::Failed {
                error,
                while_opening: true,
            } => {
                warn!(event = "stream_error", phase = "attempt", error = %error);
                self.scheduler.attempt_failed(now);
            }
            ConnectionEvent::Failed {
                error,
                while_opening: false,
            } => {
                warn!(event = "stream_error", phase = "live", error = %error);
                if self.scheduler.connection_lost(now) {
                    self.begin_attempt(now);
                }
            }
        }
    }

    fn publish_connected(&self) {
        let connected = self.connection.is_open() && self.scheduler.is_connected();
        self.connected_tx
            .send_if_modified(|current| std::mem::replace(current, connected) != connected);
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
