//! The inbound byte accumulator.
//!
//! Bytes are appended at the back and only ever removed from the front, in
//! whole-frame or whole-buffer units.

use regex::bytes::Regex;

use crate::matcher::{self, FrameMatch, MatchStrategy};
use crate::notification::{Fired, NotificationRegistry};

/// A frame sliced off the buffer front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Frame {
    pub(crate) bytes: Vec<u8>,
    pub(crate) captures: Vec<Option<String>>,
}

#[derive(Debug)]
pub(crate) struct InboundBuffer {
    data: Vec<u8>,
    trim_terminators: bool,
    max_len: usize,
}

impl InboundBuffer {
    pub(crate) fn new(trim_terminators: bool, max_len: usize) -> Self {
        InboundBuffer {
            data: Vec::new(),
            trim_terminators,
            max_len,
        }
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Append a chunk. Returns `true` if the buffer is now over its limit.
    pub(crate) fn append(&mut self, chunk: &[u8]) -> bool {
        self.data.extend_from_slice(chunk);
        self.data.len() > self.max_len
    }

    /// Drop leading `\r`/`\n` bytes, if trimming is enabled.
    pub(crate) fn trim(&mut self) {
        if !self.trim_terminators {
            return;
        }
        let n = matcher::leading_terminators(&self.data);
        if n > 0 {
            self.data.drain(..n);
        }
    }

    /// Remove and return the first `n` bytes.
    pub(crate) fn consume(&mut self, n: usize) -> Vec<u8> {
        let n = n.min(self.data.len());
        self.data.drain(..n).collect()
    }

    /// Remove and return everything.
    pub(crate) fn take_all(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.data)
    }

    pub(crate) fn clear(&mut self) {
        self.data.clear();
    }

    /// Apply `strategy` and, on a match, slice the frame off the front.
    ///
    /// Leading terminators are trimmed again after a frame is removed.
    pub(crate) fn take_frame(&mut self, strategy: &MatchStrategy, line: &Regex) -> Option<Frame> {
        match matcher::match_frame(strategy, &self.data, line) {
            FrameMatch::Frame { consumed, captures } => {
                let bytes = self.consume(consumed);
                self.trim();
                Some(Frame { bytes, captures })
            }
            FrameMatch::Incomplete => None,
        }
    }

    /// Fire notifications until a full pass over the registry matches nothing.
    ///
    /// Each firing is returned with the bytes it consumed, in firing order.
    pub(crate) fn scan_notifications(
        &mut self,
        registry: &NotificationRegistry,
    ) -> Vec<(Fired, Vec<u8>)> {
        let mut fired = Vec::new();
        if registry.is_empty() {
            return fired;
        }
        while let Some(hit) = registry.first_match(&self.data) {
            let bytes = self.consume(hit.consumed);
            self.trim();
            fired.push((hit, bytes));
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::{compile_line, DEFAULT_LINE_PATTERN};
    use crate::notification::Notification;

    fn line() -> Regex {
        compile_line(DEFAULT_LINE_PATTERN).unwrap()
    }

    fn ring_registry() -> NotificationRegistry {
        let mut registry = NotificationRegistry::default();
        registry.insert(Notification::new("ring", r"^RING\r\n").unwrap());
        registry
    }

    #[test]
    fn trim_removes_leading_terminators_only() {
        let mut buf = InboundBuffer::new(true, 64);
        buf.append(b"\r\n\r\nOK\r\n");
        buf.trim();
        assert_eq!(buf.as_slice(), b"OK\r\n");
    }

    #[test]
    fn trim_disabled_keeps_bytes() {
        let mut buf = InboundBuffer::new(false, 64);
        buf.append(b"\r\nOK\r\n");
        buf.trim();
        assert_eq!(buf.as_slice(), b"\r\nOK\r\n");
    }

    #[test]
    fn append_reports_overflow() {
        let mut buf = InboundBuffer::new(true, 4);
        assert!(!buf.append(b"ABCD"));
        assert!(buf.append(b"E"));
        assert_eq!(buf.len(), 5);
    }

    #[test]
    fn take_frame_slices_front_and_retrims() {
        let mut buf = InboundBuffer::new(true, 64);
        buf.append(b"OK\r\n\r\nRING\r\n");
        let frame = buf.take_frame(&MatchStrategy::text("OK"), &line()).unwrap();
        assert_eq!(frame.bytes, b"OK\r\n");
        assert_eq!(frame.captures[1].as_deref(), Some("OK"));
        assert_eq!(buf.as_slice(), b"RING\r\n");
    }

    #[test]
    fn take_frame_incomplete_leaves_buffer() {
        let mut buf = InboundBuffer::new(true, 64);
        buf.append(b"AB");
        assert_eq!(buf.take_frame(&MatchStrategy::bytes(5), &line()), None);
        assert_eq!(buf.as_slice(), b"AB");
        buf.append(b"CDE");
        let frame = buf.take_frame(&MatchStrategy::bytes(5), &line()).unwrap();
        assert_eq!(frame.bytes, b"ABCDE");
        assert!(buf.is_empty());
    }

    #[test]
    fn repeated_notifications_all_fire() {
        let mut buf = InboundBuffer::new(true, 64);
        buf.append(b"RING\r\nRING\r\n");
        let fired = buf.scan_notifications(&ring_registry());
        assert_eq!(fired.len(), 2);
        assert!(fired.iter().all(|(hit, bytes)| hit.name == "ring" && bytes == b"RING\r\n"));
        assert!(buf.is_empty());
    }

    #[test]
    fn blank_lines_between_notifications_are_trimmed() {
        let mut buf = InboundBuffer::new(true, 64);
        buf.append(b"RING\r\n\r\nRING\r\n");
        assert_eq!(buf.scan_notifications(&ring_registry()).len(), 2);
        assert!(buf.is_empty());
    }

    #[test]
    fn scan_stops_at_unmatched_bytes() {
        let mut buf = InboundBuffer::new(true, 64);
        buf.append(b"RING\r\nNO CARRIER\r\n");
        assert_eq!(buf.scan_notifications(&ring_registry()).len(), 1);
        assert_eq!(buf.as_slice(), b"NO CARRIER\r\n");
    }

    #[test]
    fn scan_with_empty_registry_is_noop() {
        let mut buf = InboundBuffer::new(true, 64);
        buf.append(b"RING\r\n");
        assert!(buf.scan_notifications(&NotificationRegistry::default()).is_empty());
        assert_eq!(buf.len(), 6);
    }

    #[test]
    fn take_all_and_clear() {
        let mut buf = InboundBuffer::new(true, 64);
        buf.append(b"junk");
        assert_eq!(buf.take_all(), b"junk");
        assert!(buf.is_empty());
        buf.append(b"more");
        buf.clear();
        assert!(buf.is_empty());
    }
}
