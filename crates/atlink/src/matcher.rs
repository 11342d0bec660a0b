//! Response framing: decide whether the inbound buffer holds a complete frame.
//!
//! Framing is protocol-specific, so the dispatcher stays agnostic and hands
//! the buffer to one of a closed set of [`MatchStrategy`] disciplines:
//! line-delimited text, a caller regex, a fixed byte count, or a caller
//! function. All matching works on raw bytes (`regex::bytes`), so consumed
//! lengths are exact even when the device emits non-UTF-8 data.

use std::fmt;
use std::sync::Arc;

use regex::bytes::{Captures, Regex, RegexBuilder};
use tracing::warn;

use atlink_core::error::{Error, Result};

/// Default line-framing pattern: one non-empty line ended by CRLF.
///
/// Leading terminators are trimmed before matching, so the pattern does not
/// need to skip the blank line most modems emit before a reply. Compiled with
/// [`compile_line`], so `.` matches any byte but `\n`.
pub const DEFAULT_LINE_PATTERN: &str = r"^(.+)\r\n";

/// Bytes treated as line terminators when trimming the buffer front.
pub const LINE_TERMINATORS: &[u8] = b"\r\n";

/// A caller-supplied framing function.
///
/// Receives the whole buffer and returns how many leading bytes form a
/// complete frame; `0` means "not yet".
pub type FrameFn = Arc<dyn Fn(&[u8]) -> usize + Send + Sync>;

/// How a command recognizes the end of its response.
#[derive(Clone)]
pub enum MatchStrategy {
    /// One line, framed by the modem's line pattern, compared with this text.
    ///
    /// Any complete line finishes the command; whether it equalled the
    /// expected text is the processed result.
    ExactText(String),
    /// A regex applied to the buffer; the frame runs to the end of the match.
    Pattern(Regex),
    /// Exactly this many bytes, whatever they contain. `0` means
    /// fire-and-forget: the command finishes as soon as it is written.
    ByteCount(usize),
    /// Framing delegated to a caller function.
    Custom(FrameFn),
}

impl MatchStrategy {
    /// Expect a line equal to `expected`.
    pub fn text(expected: impl Into<String>) -> Self {
        MatchStrategy::ExactText(expected.into())
    }

    /// Expect a frame matching `pattern`.
    ///
    /// Fails with [`Error::InvalidParameter`] if the pattern does not compile.
    pub fn pattern(pattern: &str) -> Result<Self> {
        compile(pattern).map(MatchStrategy::Pattern)
    }

    /// Expect exactly `n` raw bytes.
    pub fn bytes(n: usize) -> Self {
        MatchStrategy::ByteCount(n)
    }

    /// Frame with a caller function; see [`FrameFn`].
    pub fn custom(f: impl Fn(&[u8]) -> usize + Send + Sync + 'static) -> Self {
        MatchStrategy::Custom(Arc::new(f))
    }

    /// Short name of the discipline, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            MatchStrategy::ExactText(_) => "text",
            MatchStrategy::Pattern(_) => "pattern",
            MatchStrategy::ByteCount(_) => "bytes",
            MatchStrategy::Custom(_) => "custom",
        }
    }
}

impl Default for MatchStrategy {
    fn default() -> Self {
        MatchStrategy::text("OK")
    }
}

impl fmt::Debug for MatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchStrategy::ExactText(s) => f.debug_tuple("ExactText").field(s).finish(),
            MatchStrategy::Pattern(re) => f.debug_tuple("Pattern").field(&re.as_str()).finish(),
            MatchStrategy::ByteCount(n) => f.debug_tuple("ByteCount").field(n).finish(),
            MatchStrategy::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Result of looking for a frame in the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameMatch {
    /// A complete frame occupies the first `consumed` bytes.
    Frame {
        /// Number of leading bytes that belong to the frame.
        consumed: usize,
        /// Regex capture groups (index 0 = whole match); empty for
        /// byte-count and custom framing.
        captures: Vec<Option<String>>,
    },

    /// The buffer does not hold a complete frame yet.
    Incomplete,
}

/// Compile a byte-oriented regex, mapping failures to [`Error::InvalidParameter`].
pub fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| Error::InvalidParameter(format!("invalid pattern {pattern:?}: {e}")))
}

/// Compile a line-framing pattern with Unicode mode off.
///
/// A reply line holding bytes that are not valid UTF-8 must still frame, so
/// `.` and classes match single bytes here.
pub fn compile_line(pattern: &str) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .unicode(false)
        .build()
        .map_err(|e| Error::InvalidParameter(format!("invalid line pattern {pattern:?}: {e}")))
}

/// Look for a frame of `strategy` at the front of `buf`.
///
/// `line` is the modem's line pattern, used by [`MatchStrategy::ExactText`].
pub fn match_frame(strategy: &MatchStrategy, buf: &[u8], line: &Regex) -> FrameMatch {
    match strategy {
        MatchStrategy::ExactText(_) => regex_frame(line, buf),
        MatchStrategy::Pattern(re) => regex_frame(re, buf),
        MatchStrategy::ByteCount(n) => {
            if buf.len() >= *n {
                FrameMatch::Frame {
                    consumed: *n,
                    captures: Vec::new(),
                }
            } else {
                FrameMatch::Incomplete
            }
        }
        MatchStrategy::Custom(f) => match f(buf) {
            0 => FrameMatch::Incomplete,
            n => {
                if n > buf.len() {
                    warn!(
                        claimed = n,
                        available = buf.len(),
                        "custom matcher claimed more bytes than buffered, clamping"
                    );
                }
                FrameMatch::Frame {
                    consumed: n.min(buf.len()),
                    captures: Vec::new(),
                }
            }
        },
    }
}

/// Apply `re` to `buf`; the frame extends through the end of the match.
pub(crate) fn regex_frame(re: &Regex, buf: &[u8]) -> FrameMatch {
    match re.captures(buf) {
        Some(caps) => FrameMatch::Frame {
            consumed: caps.get(0).map_or(0, |m| m.end()),
            captures: capture_texts(&caps),
        },
        None => FrameMatch::Incomplete,
    }
}

/// Capture groups as (lossily decoded) text.
pub(crate) fn capture_texts(caps: &Captures<'_>) -> Vec<Option<String>> {
    caps.iter()
        .map(|g| g.map(|m| String::from_utf8_lossy(m.as_bytes()).into_owned()))
        .collect()
}

/// Number of leading line-terminator bytes in `buf`.
pub fn leading_terminators(buf: &[u8]) -> usize {
    buf.iter()
        .take_while(|b| LINE_TERMINATORS.contains(b))
        .count()
}
