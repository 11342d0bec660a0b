//! Error types for atlink.
//!
//! All fallible operations across the library return [`Result<T>`], which
//! uses [`Error`] as the error type. Transport failures and per-command
//! outcomes (rejection, timeout, abort) are all captured here.

use crate::types::CommandId;

/// The error type for all atlink operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A transport-level error (serial port open/configure failure).
    #[error("transport error: {0}")]
    Transport(String),

    /// A transport read produced no data before its deadline.
    ///
    /// This is the idle signal of [`Transport::receive`](crate::Transport::receive);
    /// commands that never see a reply fail with [`Error::CommandTimeout`].
    #[error("timeout waiting for data")]
    Timeout,

    /// No transport is attached, or the attached transport is closed.
    #[error("not connected")]
    NotConnected,

    /// The connection to the device was lost unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

    /// An invalid parameter was passed (bad pattern, zero timeout, ...).
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A directly-run command could not start because the channel was busy
    /// (another command active) or dirty (unconsumed bytes buffered).
    #[error("command {id} rejected: channel busy")]
    Rejected {
        /// The rejected command.
        id: CommandId,
    },

    /// No matching frame arrived before the deadline.
    ///
    /// `partial` holds whatever bytes were buffered when the deadline fired.
    #[error("command {id} timed out ({} bytes buffered)", partial.len())]
    CommandTimeout {
        /// The timed-out command.
        id: CommandId,
        /// Bytes buffered at the time of expiry.
        partial: Vec<u8>,
    },

    /// The command was cancelled before it completed.
    #[error("command {id} aborted")]
    Aborted {
        /// The aborted command.
        id: CommandId,
    },

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_transport() {
        let e = Error::Transport("port busy".into());
        assert_eq!(e.to_string(), "transport error: port busy");
    }

    #[test]
    fn error_display_rejected() {
        let e = Error::Rejected { id: CommandId(7) };
        assert_eq!(e.to_string(), "command #7 rejected: channel busy");
    }

    #[test]
    fn error_display_command_timeout_counts_partial_bytes() {
        let e = Error::CommandTimeout {
            id: CommandId(3),
            partial: b"+CS".to_vec(),
        };
        assert_eq!(e.to_string(), "command #3 timed out (3 bytes buffered)");
    }

    #[test]
    fn error_display_aborted() {
        let e = Error::Aborted { id: CommandId(12) };
        assert_eq!(e.to_string(), "command #12 aborted");
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broken");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Io(_)));
        assert!(e.to_string().contains("pipe broken"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
