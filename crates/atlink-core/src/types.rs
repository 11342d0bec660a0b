//! Shared command lifecycle types.

use std::fmt;

/// Identifier of a submitted command, unique within one modem.
///
/// Assigned from a per-modem counter starting at 1, so ids also reflect
/// submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommandId(pub u64);

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle state of a command.
///
/// `Init -> Running -> {Finished, Timeout, Aborted}`, or `Init -> Rejected`
/// for a direct run on a busy channel. Queued commands that are cleared
/// before dispatch go `Init -> Aborted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CommandState {
    /// Created or queued, not yet written.
    #[default]
    Init,
    /// Could not start: the channel was busy or the write failed.
    Rejected,
    /// Payload written; waiting for a matching frame.
    Running,
    /// A frame matched and the result was stored.
    Finished,
    /// The deadline expired before a frame matched.
    Timeout,
    /// Cancelled by the caller.
    Aborted,
}

impl CommandState {
    /// Whether the command has reached its final state.
    pub fn is_terminal(self) -> bool {
        !matches!(self, CommandState::Init | CommandState::Running)
    }
}

impl fmt::Display for CommandState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CommandState::Init => "init",
            CommandState::Rejected => "rejected",
            CommandState::Running => "running",
            CommandState::Finished => "finished",
            CommandState::Timeout => "timeout",
            CommandState::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Application-level value produced by a command's result processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Outcome of an exact-text comparison.
    Bool(bool),
    /// Raw frame bytes.
    Bytes(Vec<u8>),
    /// Regex capture groups; index 0 is the whole match.
    Captures(Vec<Option<String>>),
    /// Free-form text produced by a custom processor.
    Text(String),
    /// Integer produced by a custom processor.
    Integer(i64),
}

impl Value {
    /// The boolean payload, if this is a [`Value::Bool`].
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The byte payload, if this is a [`Value::Bytes`].
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Capture group `i`, if this is a [`Value::Captures`] and the group took part.
    pub fn capture(&self, i: usize) -> Option<&str> {
        match self {
            Value::Captures(groups) => groups.get(i).and_then(|g| g.as_deref()),
            _ => None,
        }
    }
}
