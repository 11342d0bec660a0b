//! Asynchronous modem session events.
//!
//! Events are published by the dispatcher through a [`tokio::sync::broadcast`]
//! channel. Delivery is best-effort: a lagging subscriber may miss events
//! under heavy traffic.

use crate::types::{CommandId, CommandState, Value};

/// A session-level event emitted by a running modem.
#[derive(Debug, Clone)]
pub enum ModemEvent {
    /// A transport was attached and is ready for traffic.
    Opened,

    /// Raw bytes arrived from the transport, before any framing.
    Data(Vec<u8>),

    /// The transport was closed on request.
    Closed,

    /// The transport reported that the device went away.
    Disconnected,

    /// A transport read or write failed.
    Error(String),

    /// Buffered bytes matched nothing before the deadline and were dropped.
    Discarding(Vec<u8>),

    /// A command reached a terminal state.
    Command {
        /// The command that completed.
        id: CommandId,
        /// Its terminal state.
        state: CommandState,
        /// The processed result, present only for finished commands whose
        /// processor produced one.
        processed: Option<Value>,
    },

    /// A registered notification pattern matched unsolicited bytes.
    Notification(NotificationEvent),
}

/// One firing of a named notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    /// The registry name of the notification.
    pub name: String,
    /// The bytes consumed by the match.
    pub bytes: Vec<u8>,
    /// Regex capture groups; index 0 is the whole match.
    pub captures: Vec<Option<String>>,
}
