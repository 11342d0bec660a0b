//! Commands: what to send, how to recognize the reply, what to make of it.
//!
//! A [`Command`] is built by the caller and handed to a
//! [`Modem`](crate::Modem). From then on the dispatcher owns it as a
//! [`Submitted`] command, and the caller only holds a [`CommandHandle`]: the
//! id, a live view of the state, and a one-shot outcome.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::{oneshot, watch};
use tracing::error;

use atlink_core::error::{Error, Result};
use atlink_core::types::{CommandId, CommandState, Value};

use crate::matcher::MatchStrategy;

/// Maps a matched frame (raw bytes and capture groups) to an application value.
pub type ResultProcessor = Arc<dyn Fn(&[u8], &[Option<String>]) -> Option<Value> + Send + Sync>;

/// Called once with the processed value when a command finishes.
pub type ResultCallback = Box<dyn FnOnce(Option<&Value>) + Send>;

/// What a command writes to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// A text line; the modem's EOL is appended when written.
    Line(String),
    /// Bytes written verbatim.
    Raw(Vec<u8>),
    /// Nothing is written (e.g. a pure read).
    Empty,
}

impl Payload {
    /// The exact bytes to write, given the modem's EOL.
    pub fn encode(&self, eol: &str) -> Vec<u8> {
        match self {
            Payload::Line(text) => {
                let mut bytes = Vec::with_capacity(text.len() + eol.len());
                bytes.extend_from_slice(text.as_bytes());
                bytes.extend_from_slice(eol.as_bytes());
                bytes
            }
            Payload::Raw(bytes) => bytes.clone(),
            Payload::Empty => Vec::new(),
        }
    }
}

/// Which processor a command runs on its frame.
#[derive(Clone)]
enum Processing {
    /// The per-strategy default.
    Default,
    /// No processing; the result carries only bytes and captures.
    Disabled,
    Custom(ResultProcessor),
}

/// A command description, built by the caller.
///
/// ```
/// use atlink::Command;
///
/// let cmd = Command::line("AT+CFUN=1").expect_text("OK");
/// let raw = Command::raw(vec![0x1A]).expect_pattern(r"^\+CMGS: (\d+)\r\n").unwrap();
/// ```
pub struct Command {
    payload: Payload,
    expected: Option<MatchStrategy>,
    processing: Processing,
    callback: Option<ResultCallback>,
}

impl Command {
    /// A text command; the modem's EOL is appended when written.
    pub fn line(text: impl Into<String>) -> Self {
        Self::with_payload(Payload::Line(text.into()))
    }

    /// A command sending `bytes` verbatim.
    pub fn raw(bytes: impl Into<Vec<u8>>) -> Self {
        Self::with_payload(Payload::Raw(bytes.into()))
    }

    /// A command that writes nothing and only waits for a frame.
    pub fn listen() -> Self {
        Self::with_payload(Payload::Empty)
    }

    fn with_payload(payload: Payload) -> Self {
        Command {
            payload,
            expected: None,
            processing: Processing::Default,
            callback: None,
        }
    }

    /// Use `strategy` to recognize the reply.
    ///
    /// Without one, the modem's configured default applies.
    pub fn expect(mut self, strategy: MatchStrategy) -> Self {
        self.expected = Some(strategy);
        self
    }

    /// Expect a line equal to `text`.
    pub fn expect_text(self, text: impl Into<String>) -> Self {
        self.expect(MatchStrategy::text(text))
    }

    /// Expect a frame matching `pattern`.
    pub fn expect_pattern(self, pattern: &str) -> Result<Self> {
        Ok(self.expect(MatchStrategy::pattern(pattern)?))
    }

    /// Expect exactly `n` bytes.
    pub fn expect_bytes(self, n: usize) -> Self {
        self.expect(MatchStrategy::bytes(n))
    }

    /// Replace the default result processor.
    ///
    /// `f` runs on the dispatcher task and must not block. A panic in `f` is
    /// caught and logged; the command still finishes, with no processed value.
    pub fn process_with(
        mut self,
        f: impl Fn(&[u8], &[Option<String>]) -> Option<Value> + Send + Sync + 'static,
    ) -> Self {
        self.processing = Processing::Custom(Arc::new(f));
        self
    }

    /// Skip result processing entirely.
    pub fn unprocessed(mut self) -> Self {
        self.processing = Processing::Disabled;
        self
    }

    /// Call `f` with the processed value once the command finishes.
    ///
    /// Runs on the dispatcher task; a panic in `f` is caught and logged.
    pub fn on_result(mut self, f: impl FnOnce(Option<&Value>) + Send + 'static) -> Self {
        self.callback = Some(Box::new(f));
        self
    }

    /// The payload this command writes.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Turn the description into a dispatcher-owned command plus the
    /// caller's handle.
    pub(crate) fn submit(
        self,
        id: CommandId,
        default_expected: &MatchStrategy,
    ) -> (Submitted, CommandHandle) {
        let strategy = self.expected.unwrap_or_else(|| default_expected.clone());
        let processor = match self.processing {
            Processing::Default => default_processor(&strategy),
            Processing::Disabled => None,
            Processing::Custom(f) => Some(f),
        };

        let (state_tx, state_rx) = watch::channel(CommandState::Init);
        let (outcome_tx, outcome_rx) = oneshot::channel();

        let submitted = Submitted {
            id,
            payload: self.payload,
            strategy,
            processor,
            callback: self.callback,
            state_tx,
            outcome_tx: Some(outcome_tx),
        };
        let handle = CommandHandle {
            id,
            state: state_rx,
            outcome: outcome_rx,
        };
        (submitted, handle)
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("payload", &self.payload)
            .field("expected", &self.expected)
            .finish_non_exhaustive()
    }
}

/// The per-strategy default processor.
///
/// - text: whether the framed line equals the expected text
/// - pattern: the capture groups
/// - bytes: the raw bytes
/// - custom: none
fn default_processor(strategy: &MatchStrategy) -> Option<ResultProcessor> {
    match strategy {
        MatchStrategy::ExactText(expected) => {
            let expected = expected.clone();
            Some(Arc::new(move |_bytes: &[u8], captures: &[Option<String>]| {
                // Prefer the first group; fall back to the whole match when
                // the line pattern has no group.
                let line = captures
                    .get(1)
                    .or_else(|| captures.first())
                    .and_then(|c| c.as_deref());
                Some(Value::Bool(line == Some(expected.as_str())))
            }))
        }
        MatchStrategy::Pattern(_) => Some(Arc::new(|_bytes: &[u8], captures: &[Option<String>]| {
            Some(Value::Captures(captures.to_vec()))
        })),
        MatchStrategy::ByteCount(_) => Some(Arc::new(|bytes: &[u8], _captures: &[Option<String>]| {
            Some(Value::Bytes(bytes.to_vec()))
        })),
        MatchStrategy::Custom(_) => None,
    }
}

/// The stored result of a terminal command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    /// Bytes consumed by the frame (or buffered at timeout).
    pub bytes: Vec<u8>,
    /// Regex capture groups of the frame, if any.
    pub captures: Vec<Option<String>>,
    /// The processor's value.
    pub processed: Option<Value>,
}

impl CommandResult {
    /// The processed value, falling back to the raw bytes.
    pub fn value(&self) -> Value {
        self.processed
            .clone()
            .unwrap_or_else(|| Value::Bytes(self.bytes.clone()))
    }
}

/// Snapshot of a command for inspection (`pending_commands`, `current_command`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInfo {
    /// The command id.
    pub id: CommandId,
    /// Its state at snapshot time.
    pub state: CommandState,
    /// What it writes (or wrote).
    pub payload: Payload,
    /// The strategy kind (`text`, `pattern`, `bytes`, `custom`).
    pub strategy: &'static str,
}

/// The caller's view of a submitted command.
#[derive(Debug)]
pub struct CommandHandle {
    id: CommandId,
    state: watch::Receiver<CommandState>,
    outcome: oneshot::Receiver<Result<CommandResult>>,
}

impl CommandHandle {
    /// The id assigned at submission.
    pub fn id(&self) -> CommandId {
        self.id
    }

    /// The command's current state.
    pub fn state(&self) -> CommandState {
        *self.state.borrow()
    }

    /// Wait for the terminal state, without consuming the handle.
    ///
    /// If the modem shuts down first, returns the last state seen.
    pub async fn settled(&mut self) -> CommandState {
        let _ = self.state.wait_for(|s| s.is_terminal()).await;
        *self.state.borrow()
    }

    /// Wait for the outcome.
    ///
    /// Resolves with the result once the command finishes; rejection, timeout
    /// and abort resolve with the matching [`Error`]. If the modem shuts down
    /// first, the error is [`Error::NotConnected`].
    pub async fn outcome(self) -> Result<CommandResult> {
        self.outcome.await.map_err(|_| Error::NotConnected)?
    }

    /// Wait for the outcome and return the processed value (or the raw
    /// bytes when there is none).
    pub async fn value(self) -> Result<Value> {
        self.outcome().await.map(|r| r.value())
    }
}

/// A command owned by the dispatcher.
pub(crate) struct Submitted {
    pub(crate) id: CommandId,
    pub(crate) payload: Payload,
    pub(crate) strategy: MatchStrategy,
    processor: Option<ResultProcessor>,
    callback: Option<ResultCallback>,
    state_tx: watch::Sender<CommandState>,
    outcome_tx: Option<oneshot::Sender<Result<CommandResult>>>,
}

impl Submitted {
    pub(crate) fn state(&self) -> CommandState {
        *self.state_tx.borrow()
    }

    pub(crate) fn info(&self) -> CommandInfo {
        CommandInfo {
            id: self.id,
            state: self.state(),
            payload: self.payload.clone(),
            strategy: self.strategy.kind(),
        }
    }

    pub(crate) fn mark_running(&self) {
        self.state_tx.send_replace(CommandState::Running);
    }

    /// Store a matched frame and finish. Returns the processed value for
    /// session observers.
    pub(crate) fn finish(mut self, bytes: Vec<u8>, captures: Vec<Option<String>>) -> Option<Value> {
        let processed = self.processor.as_ref().and_then(|process| {
            guarded("result processor", || process(&bytes, &captures)).flatten()
        });

        self.state_tx.send_replace(CommandState::Finished);
        if let Some(callback) = self.callback.take() {
            guarded("result callback", || callback(processed.as_ref()));
        }

        let result = CommandResult {
            bytes,
            captures,
            processed: processed.clone(),
        };
        self.resolve(Ok(result));
        processed
    }

    /// Move to a failed terminal state with `error` as the outcome.
    pub(crate) fn fail(mut self, state: CommandState, error: Error) {
        debug_assert!(state.is_terminal() && state != CommandState::Finished);
        self.state_tx.send_replace(state);
        self.resolve(Err(error));
    }

    fn resolve(&mut self, outcome: Result<CommandResult>) {
        if let Some(tx) = self.outcome_tx.take() {
            // The caller may have dropped its handle; that is fine.
            let _ = tx.send(outcome);
        }
    }
}

/// Run caller code on the dispatcher task, containing any panic.
///
/// Returns `None` if `f` panicked.
pub(crate) fn guarded<T>(what: &str, f: impl FnOnce() -> T) -> Option<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_default();
            error!(what, %message, "caller code panicked");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submit(cmd: Command) -> (Submitted, CommandHandle) {
        cmd.submit(CommandId(1), &MatchStrategy::default())
    }

    fn caps(groups: &[&str]) -> Vec<Option<String>> {
        groups.iter().map(|g| Some(g.to_string())).collect()
    }

    #[test]
    fn line_payload_appends_eol() {
        assert_eq!(Payload::Line("AT".into()).encode("\r\n"), b"AT\r\n");
        assert_eq!(Payload::Raw(vec![0x1A]).encode("\r\n"), vec![0x1A]);
        assert!(Payload::Empty.encode("\r\n").is_empty());
    }

    #[test]
    fn missing_strategy_uses_modem_default() {
        let (submitted, _) = Command::line("AT").submit(CommandId(1), &MatchStrategy::bytes(3));
        assert!(matches!(submitted.strategy, MatchStrategy::ByteCount(3)));
    }

    #[test]
    fn new_command_is_init() {
        let (submitted, handle) = submit(Command::line("AT"));
        assert_eq!(submitted.state(), CommandState::Init);
        assert_eq!(handle.state(), CommandState::Init);
        assert_eq!(handle.id(), CommandId(1));
    }

    #[tokio::test]
    async fn text_default_processor_compares_line() {
        let (submitted, handle) = submit(Command::line("AT").expect_text("OK"));
        submitted.finish(b"OK\r\n".to_vec(), caps(&["OK\r\n", "OK"]));
        assert_eq!(handle.value().await.unwrap(), Value::Bool(true));

        let (submitted, handle) = submit(Command::line("AT").expect_text("OK"));
        submitted.finish(b"ERROR\r\n".to_vec(), caps(&["ERROR\r\n", "ERROR"]));
        assert_eq!(handle.value().await.unwrap(), Value::Bool(false));
    }

    #[tokio::test]
    async fn text_processor_without_group_uses_whole_match() {
        let (submitted, handle) = submit(Command::line("AT").expect_text("OK"));
        submitted.finish(b"OK".to_vec(), caps(&["OK"]));
        assert_eq!(handle.value().await.unwrap(), Value::Bool(true));
    }

    #[tokio::test]
    async fn pattern_default_processor_returns_captures() {
        let (submitted, handle) =
            submit(Command::line("AT+CSQ").expect_pattern(r"^\+CSQ: (\d+)").unwrap());
        submitted.finish(b"+CSQ: 17".to_vec(), caps(&["+CSQ: 17", "17"]));
        let value = handle.value().await.unwrap();
        assert_eq!(value.capture(1), Some("17"));
    }

    #[tokio::test]
    async fn byte_count_default_processor_returns_bytes() {
        let (submitted, handle) = submit(Command::listen().expect_bytes(3));
        submitted.finish(b"ABC".to_vec(), Vec::new());
        assert_eq!(handle.value().await.unwrap(), Value::Bytes(b"ABC".to_vec()));
    }

    #[tokio::test]
    async fn custom_strategy_has_no_processed_value() {
        let (submitted, handle) = submit(Command::listen().expect(MatchStrategy::custom(|b| b.len())));
        assert_eq!(submitted.finish(b"xyz".to_vec(), Vec::new()), None);
        let result = handle.outcome().await.unwrap();
        assert_eq!(result.processed, None);
        assert_eq!(result.value(), Value::Bytes(b"xyz".to_vec()));
    }

    #[tokio::test]
    async fn custom_processor_replaces_default() {
        let (submitted, handle) = submit(
            Command::line("AT+CBC")
                .expect_pattern(r"^\+CBC: (\d+)\r\n")
                .unwrap()
                .process_with(|_, caps| {
                    caps.get(1)
                        .and_then(|c| c.as_deref())
                        .and_then(|s| s.parse().ok())
                        .map(Value::Integer)
                }),
        );
        submitted.finish(b"+CBC: 87\r\n".to_vec(), caps(&["+CBC: 87\r\n", "87"]));
        assert_eq!(handle.value().await.unwrap(), Value::Integer(87));
    }

    #[tokio::test]
    async fn unprocessed_keeps_raw_result() {
        let (submitted, handle) = submit(Command::line("AT").expect_text("OK").unprocessed());
        submitted.finish(b"OK\r\n".to_vec(), caps(&["OK\r\n", "OK"]));
        let result = handle.outcome().await.unwrap();
        assert_eq!(result.processed, None);
        assert_eq!(result.bytes, b"OK\r\n");
    }

    #[tokio::test]
    async fn callback_sees_processed_value() {
        let (tx, rx) = oneshot::channel();
        let (submitted, _handle) = submit(
            Command::line("AT")
                .expect_text("OK")
                .on_result(move |v| {
                    let _ = tx.send(v.cloned());
                }),
        );
        submitted.finish(b"OK\r\n".to_vec(), caps(&["OK\r\n", "OK"]));
        assert_eq!(rx.await.unwrap(), Some(Value::Bool(true)));
    }

    #[tokio::test]
    async fn panicking_processor_still_finishes() {
        let (submitted, mut handle) = submit(
            Command::line("AT")
                .expect_text("OK")
                .process_with(|_, _| panic!("bad processor")),
        );
        assert_eq!(submitted.finish(b"OK\r\n".to_vec(), caps(&["OK\r\n", "OK"])), None);
        assert_eq!(handle.settled().await, CommandState::Finished);
        assert_eq!(handle.value().await.unwrap(), Value::Bytes(b"OK\r\n".to_vec()));
    }

    #[tokio::test]
    async fn panicking_callback_does_not_lose_outcome() {
        let (submitted, handle) = submit(
            Command::line("AT")
                .expect_text("OK")
                .on_result(|_| panic!("bad callback")),
        );
        assert_eq!(
            submitted.finish(b"OK\r\n".to_vec(), caps(&["OK\r\n", "OK"])),
            Some(Value::Bool(true))
        );
        assert_eq!(handle.value().await.unwrap(), Value::Bool(true));
    }

    #[tokio::test]
    async fn fail_sets_state_and_rejects_outcome() {
        let (submitted, mut handle) = submit(Command::line("AT"));
        submitted.fail(CommandState::Aborted, Error::Aborted { id: CommandId(1) });
        assert_eq!(handle.settled().await, CommandState::Aborted);
        assert!(matches!(handle.outcome().await, Err(Error::Aborted { .. })));
    }

    #[tokio::test]
    async fn dropped_dispatcher_reports_not_connected() {
        let (submitted, handle) = submit(Command::line("AT"));
        drop(submitted);
        assert!(matches!(handle.outcome().await, Err(Error::NotConnected)));
    }
}
