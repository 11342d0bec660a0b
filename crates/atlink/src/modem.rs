//! The public modem handle.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::broadcast;

use atlink_core::error::Result;
use atlink_core::events::{ModemEvent, NotificationEvent};
use atlink_core::transport::Transport;
use atlink_core::types::CommandId;
use atlink_transport::SerialTransport;

use crate::command::{Command, CommandHandle, CommandInfo, Submitted};
use crate::config::ModemConfig;
use crate::io::{self, DispatcherIo, Request};
use crate::matcher;
use crate::notification::Notification;

/// A running command/response session.
///
/// Every method is a message to the dispatcher task and returns once the
/// dispatcher has applied it. Methods fail with
/// [`Error::NotConnected`](atlink_core::Error::NotConnected) only if the task
/// is gone.
///
/// Commands are not dispatched from the queue until
/// [`start_processing`](Self::start_processing) is called; [`run`](Self::run)
/// ignores that gate.
pub struct Modem {
    io: DispatcherIo,
    event_tx: broadcast::Sender<ModemEvent>,
    config: ModemConfig,
    next_id: AtomicU64,
}

impl Modem {
    /// Spawn the dispatcher for an already validated configuration.
    pub(crate) fn spawn(config: ModemConfig) -> Result<Self> {
        let line = matcher::compile_line(&config.line_regex)?;
        let (event_tx, _) = broadcast::channel(config.event_capacity);
        let io = io::spawn_dispatcher(config.clone(), line, event_tx.clone());
        Ok(Modem {
            io,
            event_tx,
            config,
            next_id: AtomicU64::new(1),
        })
    }

    /// The session configuration.
    pub fn config(&self) -> &ModemConfig {
        &self.config
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<ModemEvent> {
        self.event_tx.subscribe()
    }

    // -----------------------------------------------------------------------
    // Transport
    // -----------------------------------------------------------------------

    /// Open the serial port at `path` with the configured line settings.
    ///
    /// An already open transport is closed first; its close error, if any,
    /// is returned and nothing is opened.
    pub async fn open(&self, path: &str) -> Result<()> {
        if self.is_open().await? {
            self.close().await?;
        }
        let serial = self.config.serial()?;
        let transport = SerialTransport::open(path, &serial).await?;
        self.attach(Box::new(transport)).await
    }

    /// Attach any transport, replacing the current one.
    pub async fn attach(&self, transport: Box<dyn Transport>) -> Result<()> {
        self.io
            .request(|reply| Request::Attach { transport, reply })
            .await?
    }

    /// Whether a connected transport is attached.
    pub async fn is_open(&self) -> Result<bool> {
        self.io.request(|reply| Request::IsOpen { reply }).await
    }

    /// Close and drop the transport.
    ///
    /// Fails with [`Error::NotConnected`](atlink_core::Error::NotConnected)
    /// if nothing is attached. Pending and active commands are kept.
    pub async fn close(&self) -> Result<()> {
        self.io.request(|reply| Request::Close { reply }).await?
    }

    /// Stop reading from the transport.
    ///
    /// Inbound bytes wait in the transport until [`resume`](Self::resume);
    /// writes and the deadline keep working, so an active command can still
    /// time out. Attaching a transport resumes reading.
    pub async fn pause(&self) -> Result<()> {
        self.io
            .request(|reply| Request::SetPaused { paused: true, reply })
            .await
    }

    /// Resume reading after [`pause`](Self::pause).
    pub async fn resume(&self) -> Result<()> {
        self.io
            .request(|reply| Request::SetPaused {
                paused: false,
                reply,
            })
            .await
    }

    /// Stop the dispatcher and recover the transport.
    ///
    /// Handles of commands still queued or active resolve with
    /// [`Error::NotConnected`](atlink_core::Error::NotConnected).
    pub async fn shutdown(mut self) -> Result<Option<Box<dyn Transport>>> {
        self.io.shutdown().await
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    fn prepare(&self, command: Command) -> (Submitted, CommandHandle) {
        let id = CommandId(self.next_id.fetch_add(1, Ordering::Relaxed));
        command.submit(id, &self.config.default_expected)
    }

    /// Dispatch `command` right away, bypassing the queue.
    ///
    /// If a command is active or bytes are buffered, the command is rejected
    /// without being written and its handle resolves with
    /// [`Error::Rejected`](atlink_core::Error::Rejected).
    pub async fn run(&self, command: Command) -> Result<CommandHandle> {
        let (command, handle) = self.prepare(command);
        self.io
            .request(|reply| Request::Run { command, reply })
            .await?;
        Ok(handle)
    }

    /// Queue `command` behind any pending ones.
    pub async fn add_command(&self, command: Command) -> Result<CommandHandle> {
        let (command, handle) = self.prepare(command);
        self.io
            .request(|reply| Request::Enqueue { command, reply })
            .await?;
        Ok(handle)
    }

    /// Read exactly `n` bytes, bypassing the queue.
    ///
    /// Like [`run`](Self::run), this is rejected while a command is active or
    /// bytes are buffered.
    pub async fn read(&self, n: usize) -> Result<CommandHandle> {
        self.run(Command::listen().expect_bytes(n)).await
    }

    /// Write raw bytes now, bypassing the queue. The command finishes as
    /// soon as the bytes are sent.
    ///
    /// Rejected under the same conditions as [`run`](Self::run).
    pub async fn write(&self, bytes: impl Into<Vec<u8>>) -> Result<CommandHandle> {
        self.run(Command::raw(bytes).expect_bytes(0)).await
    }

    /// Snapshots of the queued commands, oldest first.
    pub async fn pending_commands(&self) -> Result<Vec<CommandInfo>> {
        self.io
            .request(|reply| Request::PendingCommands { reply })
            .await
    }

    /// Drop every queued command. Each one settles as aborted.
    ///
    /// Returns how many were dropped.
    pub async fn clear_pending_commands(&self) -> Result<usize> {
        self.io
            .request(|reply| Request::ClearPendingCommands { reply })
            .await
    }

    /// Snapshot of the active command, if any.
    pub async fn current_command(&self) -> Result<Option<CommandInfo>> {
        self.io
            .request(|reply| Request::CurrentCommand { reply })
            .await
    }

    /// Abort the active command. Returns `false` if none was active.
    pub async fn abort_active_command(&self) -> Result<bool> {
        self.io.request(|reply| Request::AbortActive { reply }).await
    }

    // -----------------------------------------------------------------------
    // Processing gate
    // -----------------------------------------------------------------------

    /// Let the dispatcher take commands from the queue.
    pub async fn start_processing(&self) -> Result<()> {
        self.io
            .request(|reply| Request::StartProcessing { reply })
            .await
    }

    /// Stop taking commands from the queue.
    ///
    /// With `abort_active`, the active command is aborted. With `wait_idle`,
    /// returns only once no command is active.
    pub async fn stop_processing(&self, abort_active: bool, wait_idle: bool) -> Result<()> {
        self.io
            .request(|reply| Request::StopProcessing {
                abort_active,
                reply,
            })
            .await?;
        if wait_idle {
            self.io.request(|reply| Request::WaitIdle { reply }).await?;
        }
        Ok(())
    }

    /// Whether the queue is being drained.
    pub async fn is_processing(&self) -> Result<bool> {
        self.io
            .request(|reply| Request::IsProcessing { reply })
            .await
    }

    // -----------------------------------------------------------------------
    // Notifications
    // -----------------------------------------------------------------------

    /// Register a notification, replacing one with the same name.
    pub async fn add_notification(&self, notification: Notification) -> Result<()> {
        self.io
            .request(|reply| Request::AddNotification {
                notification,
                reply,
            })
            .await
    }

    /// Unregister by name. Returns whether it was registered.
    pub async fn remove_notification(&self, name: &str) -> Result<bool> {
        let name = name.to_string();
        self.io
            .request(|reply| Request::RemoveNotification { name, reply })
            .await
    }

    /// Unregister every notification. Per-name subscriptions stay open.
    pub async fn clear_notifications(&self) -> Result<()> {
        self.io
            .request(|reply| Request::ClearNotifications { reply })
            .await
    }

    /// Registered notification names, sorted.
    pub async fn notifications(&self) -> Result<Vec<String>> {
        self.io
            .request(|reply| Request::Notifications { reply })
            .await
    }

    /// Receive firings of the notification named `name` only.
    ///
    /// The name need not be registered yet.
    pub async fn subscribe_notification(
        &self,
        name: &str,
    ) -> Result<broadcast::Receiver<NotificationEvent>> {
        let name = name.to_string();
        self.io
            .request(|reply| Request::SubscribeNotification { name, reply })
            .await
    }

    // -----------------------------------------------------------------------
    // Buffer
    // -----------------------------------------------------------------------

    /// A copy of the unconsumed inbound bytes.
    pub async fn in_buffer(&self) -> Result<Vec<u8>> {
        self.io.request(|reply| Request::InBuffer { reply }).await
    }

    /// Drop the unconsumed inbound bytes.
    pub async fn clear_in_buffer(&self) -> Result<()> {
        self.io
            .request(|reply| Request::ClearInBuffer { reply })
            .await
    }
}

impl Drop for Modem {
    fn drop(&mut self) {
        self.io.cancel();
    }
}
