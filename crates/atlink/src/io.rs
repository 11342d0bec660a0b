//! The dispatcher task.
//!
//! One tokio task owns the transport and all session state: the inbound
//! buffer, the active command slot, the pending queue, the notification
//! registry and the recovery deadline. Callers talk to it only through
//! [`Request`] messages, each carrying a `oneshot` reply, so every operation
//! is applied in order and no state is ever shared.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use regex::bytes::Regex;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use atlink_core::error::{Error, Result};
use atlink_core::events::{ModemEvent, NotificationEvent};
use atlink_core::transport::Transport;
use atlink_core::types::{CommandId, CommandState, Value};

use crate::buffer::{Frame, InboundBuffer};
use crate::command::{CommandInfo, Submitted};
use crate::config::ModemConfig;
use crate::deadline::Deadline;
use crate::matcher::MatchStrategy;
use crate::notification::{Notification, NotificationRegistry};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// How long one transport read waits before the loop re-checks requests.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Pause after a failed read so a broken transport cannot spin the loop.
const ERROR_BACKOFF: Duration = Duration::from_millis(10);

const READ_CHUNK: usize = 1024;
const REQUEST_QUEUE: usize = 32;

/// A request sent from the [`Modem`](crate::Modem) handle to the dispatcher.
pub(crate) enum Request {
    /// Replace the transport, closing any previous one.
    Attach {
        transport: Box<dyn Transport>,
        reply: oneshot::Sender<Result<()>>,
    },
    Close {
        reply: oneshot::Sender<Result<()>>,
    },
    IsOpen {
        reply: oneshot::Sender<bool>,
    },
    /// Stop or resume transport reads.
    SetPaused {
        paused: bool,
        reply: oneshot::Sender<()>,
    },
    /// Dispatch now, bypassing the queue, or reject.
    Run {
        command: Submitted,
        reply: oneshot::Sender<()>,
    },
    Enqueue {
        command: Submitted,
        reply: oneshot::Sender<()>,
    },
    AddNotification {
        notification: Notification,
        reply: oneshot::Sender<()>,
    },
    RemoveNotification {
        name: String,
        reply: oneshot::Sender<bool>,
    },
    ClearNotifications {
        reply: oneshot::Sender<()>,
    },
    Notifications {
        reply: oneshot::Sender<Vec<String>>,
    },
    SubscribeNotification {
        name: String,
        reply: oneshot::Sender<broadcast::Receiver<NotificationEvent>>,
    },
    StartProcessing {
        reply: oneshot::Sender<()>,
    },
    StopProcessing {
        abort_active: bool,
        reply: oneshot::Sender<()>,
    },
    IsProcessing {
        reply: oneshot::Sender<bool>,
    },
    /// Replied to once no command is active.
    WaitIdle {
        reply: oneshot::Sender<()>,
    },
    PendingCommands {
        reply: oneshot::Sender<Vec<CommandInfo>>,
    },
    ClearPendingCommands {
        reply: oneshot::Sender<usize>,
    },
    CurrentCommand {
        reply: oneshot::Sender<Option<CommandInfo>>,
    },
    AbortActive {
        reply: oneshot::Sender<bool>,
    },
    InBuffer {
        reply: oneshot::Sender<Vec<u8>>,
    },
    ClearInBuffer {
        reply: oneshot::Sender<()>,
    },
    /// Stop the task and hand back the transport.
    Shutdown {
        reply: oneshot::Sender<Option<Box<dyn Transport>>>,
    },
}

/// Handle to the dispatcher task. Stored inside [`Modem`](crate::Modem).
pub(crate) struct DispatcherIo {
    tx: mpsc::Sender<Request>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl DispatcherIo {
    /// Send a request and wait for its reply.
    pub(crate) async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Request,
    ) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| Error::NotConnected)?;
        reply_rx.await.map_err(|_| Error::NotConnected)
    }

    /// Shut down the task and recover the transport, if one is attached.
    pub(crate) async fn shutdown(&mut self) -> Result<Option<Box<dyn Transport>>> {
        let transport = self
            .request(|reply| Request::Shutdown { reply })
            .await?;
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        Ok(transport)
    }

    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }
}

// ---------------------------------------------------------------------------
// Spawn
// ---------------------------------------------------------------------------

/// Spawn the dispatcher with no transport attached.
pub(crate) fn spawn_dispatcher(
    config: ModemConfig,
    line: Regex,
    event_tx: broadcast::Sender<ModemEvent>,
) -> DispatcherIo {
    let (tx, rx) = mpsc::channel::<Request>(REQUEST_QUEUE);
    let cancel = CancellationToken::new();
    let dispatcher = Dispatcher::new(config, line, event_tx);

    let task = tokio::spawn(dispatcher_loop(dispatcher, rx, cancel.clone()));

    DispatcherIo {
        tx,
        cancel,
        task: Some(task),
    }
}

// ---------------------------------------------------------------------------
// Loop
// ---------------------------------------------------------------------------

/// The main loop. Runs as a spawned Tokio task.
///
/// Uses `tokio::select! { biased; }` to prioritize:
/// 1. Cancellation
/// 2. Caller requests
/// 3. Deadline expiry
/// 4. Transport reads
async fn dispatcher_loop(
    mut d: Dispatcher,
    mut rx: mpsc::Receiver<Request>,
    cancel: CancellationToken,
) {
    loop {
        let reading = !d.paused;
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("dispatcher cancelled");
                break;
            }

            req = rx.recv() => {
                match req {
                    Some(Request::Shutdown { reply }) => {
                        debug!("dispatcher shutdown requested");
                        let _ = reply.send(d.transport.take());
                        return;
                    }
                    Some(req) => d.handle_request(req).await,
                    None => {
                        debug!("request channel closed, exiting dispatcher");
                        break;
                    }
                }
            }

            _ = d.deadline.expired() => d.on_deadline().await,

            read = read_chunk(d.transport.as_mut().filter(|_| reading)) => d.on_read(read).await,
        }
    }
}

/// One transport read. Never resolves while no transport is attached or
/// reading is paused.
async fn read_chunk(transport: Option<&mut Box<dyn Transport>>) -> Result<Vec<u8>> {
    let Some(transport) = transport else {
        return std::future::pending().await;
    };
    let mut buf = [0u8; READ_CHUNK];
    let n = transport.receive(&mut buf, POLL_INTERVAL).await?;
    Ok(buf[..n].to_vec())
}

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

/// All state owned by the dispatcher task.
struct Dispatcher {
    transport: Option<Box<dyn Transport>>,
    config: ModemConfig,
    line: Regex,
    buffer: InboundBuffer,
    deadline: Deadline,
    active: Option<Submitted>,
    pending: VecDeque<Submitted>,
    notifications: NotificationRegistry,
    /// Per-name notification channels, created on first subscription.
    subscribers: HashMap<String, broadcast::Sender<NotificationEvent>>,
    processing: bool,
    paused: bool,
    idle_waiters: Vec<oneshot::Sender<()>>,
    event_tx: broadcast::Sender<ModemEvent>,
}

impl Dispatcher {
    fn new(config: ModemConfig, line: Regex, event_tx: broadcast::Sender<ModemEvent>) -> Self {
        Dispatcher {
            transport: None,
            buffer: InboundBuffer::new(config.trim_terminators, config.max_buffer),
            deadline: Deadline::new(config.timeout),
            line,
            active: None,
            pending: VecDeque::new(),
            notifications: NotificationRegistry::default(),
            subscribers: HashMap::new(),
            processing: false,
            paused: false,
            idle_waiters: Vec::new(),
            event_tx,
            config,
        }
    }

    async fn handle_request(&mut self, req: Request) {
        match req {
            Request::Attach { transport, reply } => {
                if let Some(mut old) = self.transport.take() {
                    if let Err(e) = old.close().await {
                        warn!(error = %e, "closing replaced transport failed");
                    }
                    self.emit(ModemEvent::Closed);
                }
                debug!("transport attached");
                self.transport = Some(transport);
                self.paused = false;
                self.emit(ModemEvent::Opened);
                self.settle().await;
                let _ = reply.send(Ok(()));
            }
            Request::Close { reply } => {
                let result = match self.transport.take() {
                    Some(mut transport) => {
                        let result = transport.close().await;
                        debug!("transport closed");
                        self.emit(ModemEvent::Closed);
                        result
                    }
                    None => Err(Error::NotConnected),
                };
                let _ = reply.send(result);
            }
            Request::IsOpen { reply } => {
                let open = self.transport.as_ref().is_some_and(|t| t.is_connected());
                let _ = reply.send(open);
            }
            Request::SetPaused { paused, reply } => {
                debug!(paused, "transport reads");
                self.paused = paused;
                let _ = reply.send(());
            }
            Request::Run { command, reply } => {
                self.run(command).await;
                self.settle().await;
                let _ = reply.send(());
            }
            Request::Enqueue { command, reply } => {
                debug!(id = %command.id, queued = self.pending.len() + 1, "command queued");
                self.pending.push_back(command);
                self.settle().await;
                let _ = reply.send(());
            }
            Request::AddNotification { notification, reply } => {
                debug!(name = notification.name(), pattern = notification.pattern(), "notification added");
                self.notifications.insert(notification);
                let _ = reply.send(());
            }
            Request::RemoveNotification { name, reply } => {
                let _ = reply.send(self.notifications.remove(&name).is_some());
            }
            Request::ClearNotifications { reply } => {
                self.notifications.clear();
                let _ = reply.send(());
            }
            Request::Notifications { reply } => {
                let _ = reply.send(self.notifications.names());
            }
            Request::SubscribeNotification { name, reply } => {
                let capacity = self.config.event_capacity;
                let rx = self
                    .subscribers
                    .entry(name)
                    .or_insert_with(|| broadcast::channel(capacity).0)
                    .subscribe();
                let _ = reply.send(rx);
            }
            Request::StartProcessing { reply } => {
                debug!("processing started");
                self.processing = true;
                self.settle().await;
                let _ = reply.send(());
            }
            Request::StopProcessing { abort_active, reply } => {
                debug!(abort_active, "processing stopped");
                self.processing = false;
                if abort_active {
                    self.abort_active();
                }
                self.settle().await;
                let _ = reply.send(());
            }
            Request::IsProcessing { reply } => {
                let _ = reply.send(self.processing);
            }
            Request::WaitIdle { reply } => {
                if self.active.is_none() {
                    let _ = reply.send(());
                } else {
                    self.idle_waiters.push(reply);
                }
            }
            Request::PendingCommands { reply } => {
                let _ = reply.send(self.pending.iter().map(Submitted::info).collect());
            }
            Request::ClearPendingCommands { reply } => {
                let _ = reply.send(self.clear_pending());
            }
            Request::CurrentCommand { reply } => {
                let _ = reply.send(self.active.as_ref().map(Submitted::info));
            }
            Request::AbortActive { reply } => {
                let aborted = self.abort_active();
                self.settle().await;
                let _ = reply.send(aborted);
            }
            Request::InBuffer { reply } => {
                let _ = reply.send(self.buffer.as_slice().to_vec());
            }
            Request::ClearInBuffer { reply } => {
                self.buffer.clear();
                self.settle().await;
                let _ = reply.send(());
            }
            Request::Shutdown { .. } => unreachable!("Shutdown handled in dispatcher_loop"),
        }
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    async fn on_read(&mut self, read: Result<Vec<u8>>) {
        match read {
            Ok(chunk) if !chunk.is_empty() => self.on_bytes(chunk),
            Ok(_) | Err(Error::Timeout) => {}
            Err(Error::ConnectionLost) | Err(Error::NotConnected) => {
                warn!("transport disconnected");
                self.transport = None;
                self.emit(ModemEvent::Disconnected);
            }
            Err(e) => {
                error!(error = %e, "transport read failed");
                self.emit(ModemEvent::Error(e.to_string()));
                tokio::time::sleep(ERROR_BACKOFF).await;
            }
        }
        self.settle().await;
    }

    /// Append a chunk, then match the active command or scan notifications.
    fn on_bytes(&mut self, chunk: Vec<u8>) {
        trace!(len = chunk.len(), data = ?String::from_utf8_lossy(&chunk), "rx");
        let overflow = self.buffer.append(&chunk);
        self.emit(ModemEvent::Data(chunk));
        self.deadline.restart();

        if overflow {
            warn!(
                len = self.buffer.len(),
                max = self.config.max_buffer,
                "inbound buffer overflow"
            );
            self.discard();
            return;
        }

        self.buffer.trim();

        let frame = match &self.active {
            Some(active) => self.buffer.take_frame(&active.strategy, &self.line),
            None => None,
        };
        if let Some(frame) = frame {
            if let Some(command) = self.take_active() {
                self.complete(command, frame);
            }
        }

        if self.active.is_none() {
            self.fire_notifications();
        }
    }

    fn fire_notifications(&mut self) {
        for (fired, bytes) in self.buffer.scan_notifications(&self.notifications) {
            debug!(name = %fired.name, len = bytes.len(), "notification");
            self.notifications.invoke(&fired, &bytes);

            let event = NotificationEvent {
                name: fired.name,
                bytes,
                captures: fired.captures,
            };
            if let Some(tx) = self.subscribers.get(&event.name) {
                if tx.send(event.clone()).is_err() {
                    self.subscribers.remove(&event.name);
                }
            }
            self.emit(ModemEvent::Notification(event));
        }
    }

    /// Drop everything buffered.
    fn discard(&mut self) {
        let bytes = self.buffer.take_all();
        warn!(
            len = bytes.len(),
            data = ?String::from_utf8_lossy(&bytes),
            "discarding unmatched bytes"
        );
        self.emit(ModemEvent::Discarding(bytes));
    }

    async fn on_deadline(&mut self) {
        self.deadline.disarm();
        if let Some(command) = self.take_active() {
            let id = command.id;
            let partial = self.buffer.take_all();
            warn!(%id, buffered = partial.len(), "command timed out");
            command.fail(CommandState::Timeout, Error::CommandTimeout { id, partial });
            self.emit_command(id, CommandState::Timeout, None);
        } else if !self.buffer.is_empty() {
            self.discard();
        }
        self.settle().await;
    }

    // -----------------------------------------------------------------------
    // Command lifecycle
    // -----------------------------------------------------------------------

    async fn run(&mut self, command: Submitted) {
        if self.active.is_some() || !self.buffer.is_empty() {
            let id = command.id;
            debug!(
                %id,
                active = self.active.is_some(),
                buffered = self.buffer.len(),
                "channel busy, rejecting command"
            );
            command.fail(CommandState::Rejected, Error::Rejected { id });
            self.emit_command(id, CommandState::Rejected, None);
            return;
        }
        self.dispatch(command).await;
    }

    /// Write the payload and make the command active.
    async fn dispatch(&mut self, command: Submitted) {
        let id = command.id;
        let bytes = command.payload.encode(&self.config.eol);

        if !bytes.is_empty() {
            trace!(%id, data = ?String::from_utf8_lossy(&bytes), "tx");
            let sent = match self.transport.as_mut() {
                Some(transport) => transport.send(&bytes).await,
                None => Err(Error::NotConnected),
            };
            if let Err(e) = sent {
                error!(%id, error = %e, "write failed");
                self.emit(ModemEvent::Error(e.to_string()));
                command.fail(CommandState::Rejected, e);
                self.emit_command(id, CommandState::Rejected, None);
                return;
            }
        }

        command.mark_running();
        debug!(%id, strategy = command.strategy.kind(), "command running");

        if matches!(command.strategy, MatchStrategy::ByteCount(0)) {
            let frame = Frame {
                bytes: Vec::new(),
                captures: Vec::new(),
            };
            self.complete(command, frame);
            return;
        }

        self.active = Some(command);
        self.deadline.restart();
    }

    fn complete(&mut self, command: Submitted, frame: Frame) {
        let id = command.id;
        let processed = command.finish(frame.bytes, frame.captures);
        debug!(%id, ?processed, "command finished");
        self.emit_command(id, CommandState::Finished, processed);
    }

    /// Dispatch queued commands while the channel is free.
    async fn drain(&mut self) {
        while self.active.is_none() && self.processing && self.buffer.is_empty() {
            let Some(command) = self.pending.pop_front() else {
                break;
            };
            self.dispatch(command).await;
        }
    }

    fn abort_active(&mut self) -> bool {
        let Some(command) = self.take_active() else {
            return false;
        };
        let id = command.id;
        debug!(%id, "aborting active command");
        command.fail(CommandState::Aborted, Error::Aborted { id });
        self.emit_command(id, CommandState::Aborted, None);
        self.deadline.disarm();
        true
    }

    fn clear_pending(&mut self) -> usize {
        let cleared = std::mem::take(&mut self.pending);
        let count = cleared.len();
        for command in cleared {
            let id = command.id;
            command.fail(CommandState::Aborted, Error::Aborted { id });
            self.emit_command(id, CommandState::Aborted, None);
        }
        if count > 0 {
            debug!(count, "pending commands cleared");
        }
        count
    }

    /// Empty the active slot, waking anyone waiting for idle.
    fn take_active(&mut self) -> Option<Submitted> {
        let command = self.active.take();
        if command.is_some() {
            for waiter in self.idle_waiters.drain(..) {
                let _ = waiter.send(());
            }
        }
        command
    }

    /// End-of-event bookkeeping: drain the queue, then arm the deadline iff
    /// a command is active or bytes are buffered.
    async fn settle(&mut self) {
        self.drain().await;
        self.deadline
            .sync(self.active.is_some() || !self.buffer.is_empty());
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    fn emit(&self, event: ModemEvent) {
        let _ = self.event_tx.send(event);
    }

    fn emit_command(&self, id: CommandId, state: CommandState, processed: Option<Value>) {
        self.emit(ModemEvent::Command {
            id,
            state,
            processed,
        });
    }
}
