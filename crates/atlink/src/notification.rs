//! Unsolicited notifications: named patterns that fire outside any exchange.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use regex::bytes::Regex;

use atlink_core::error::Result;

use crate::command::guarded;
use crate::matcher::{self, FrameMatch};

/// Called with the matched bytes and capture groups each time a
/// notification fires.
pub type NotificationHandler = Arc<dyn Fn(&[u8], &[Option<String>]) + Send + Sync>;

/// A standing pattern for an unsolicited message such as `RING` or `+CMTI`.
#[derive(Clone)]
pub struct Notification {
    name: String,
    pattern: Regex,
    handler: Option<NotificationHandler>,
}

impl Notification {
    /// Create a notification named `name` matching `pattern`.
    ///
    /// Anchor the pattern (`^RING\r\n`) unless skipping leading noise is
    /// intended: a match consumes everything up to its end.
    pub fn new(name: impl Into<String>, pattern: &str) -> Result<Self> {
        Ok(Notification {
            name: name.into(),
            pattern: matcher::compile(pattern)?,
            handler: None,
        })
    }

    /// Attach a handler invoked on every firing.
    ///
    /// The handler runs on the dispatcher task and must not block. A panic
    /// in it is caught and logged, and the notification still counts as fired.
    pub fn with_handler(mut self, f: impl Fn(&[u8], &[Option<String>]) + Send + Sync + 'static) -> Self {
        self.handler = Some(Arc::new(f));
        self
    }

    /// The registry name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The pattern source.
    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }
}

impl fmt::Debug for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notification")
            .field("name", &self.name)
            .field("pattern", &self.pattern.as_str())
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

/// A notification that matched the buffer front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Fired {
    pub(crate) name: String,
    pub(crate) consumed: usize,
    pub(crate) captures: Vec<Option<String>>,
}

/// Notifications keyed by name. Scans visit them in name order.
#[derive(Debug, Default)]
pub(crate) struct NotificationRegistry {
    entries: BTreeMap<String, Notification>,
}

impl NotificationRegistry {
    /// Insert, replacing any notification with the same name.
    pub(crate) fn insert(&mut self, notification: Notification) -> Option<Notification> {
        self.entries.insert(notification.name.clone(), notification)
    }

    pub(crate) fn remove(&mut self, name: &str) -> Option<Notification> {
        self.entries.remove(name)
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub(crate) fn get(&self, name: &str) -> Option<&Notification> {
        self.entries.get(name)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The first notification (in name order) matching `buf`.
    ///
    /// Empty matches are skipped: they would consume nothing and fire forever.
    pub(crate) fn first_match(&self, buf: &[u8]) -> Option<Fired> {
        self.entries.values().find_map(|n| match matcher::regex_frame(&n.pattern, buf) {
            FrameMatch::Frame { consumed, captures } if consumed > 0 => Some(Fired {
                name: n.name.clone(),
                consumed,
                captures,
            }),
            _ => None,
        })
    }

    /// Run the handler of `fired`, if the notification has one.
    pub(crate) fn invoke(&self, fired: &Fired, bytes: &[u8]) {
        if let Some(handler) = self.get(&fired.name).and_then(|n| n.handler.as_ref()) {
            guarded("notification handler", || handler(bytes, &fired.captures));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn registry(entries: &[(&str, &str)]) -> NotificationRegistry {
        let mut registry = NotificationRegistry::default();
        for (name, pattern) in entries {
            registry.insert(Notification::new(*name, pattern).unwrap());
        }
        registry
    }

    #[test]
    fn first_match_reports_consumed_and_captures() {
        let registry = registry(&[("sms", r#"^\+CMTI: "(\w+)",(\d+)\r\n"#)]);
        let fired = registry.first_match(b"+CMTI: \"SM\",3\r\nRING\r\n").unwrap();
        assert_eq!(fired.name, "sms");
        assert_eq!(fired.consumed, 15);
        assert_eq!(fired.captures[1].as_deref(), Some("SM"));
        assert_eq!(fired.captures[2].as_deref(), Some("3"));
    }

    #[test]
    fn no_match_is_none() {
        let registry = registry(&[("ring", r"^RING\r\n")]);
        assert_eq!(registry.first_match(b"RIN"), None);
    }

    #[test]
    fn scan_order_is_by_name() {
        // Both match; "a-any" sorts first.
        let registry = registry(&[("z-ring", r"^RING\r\n"), ("a-any", r"^\w+\r\n")]);
        assert_eq!(registry.first_match(b"RING\r\n").unwrap().name, "a-any");
    }

    #[test]
    fn empty_matches_never_fire() {
        let registry = registry(&[("empty", r"^(x*)")]);
        assert_eq!(registry.first_match(b"RING\r\n"), None);
    }

    #[test]
    fn insert_replaces_same_name() {
        let mut registry = registry(&[("ring", r"^RING\r\n")]);
        let old = registry.insert(Notification::new("ring", r"^RING2\r\n").unwrap());
        assert_eq!(old.unwrap().pattern(), r"^RING\r\n");
        assert_eq!(registry.names(), vec!["ring".to_string()]);
    }

    #[test]
    fn remove_and_clear() {
        let mut registry = registry(&[("ring", r"^RING\r\n"), ("sms", r"^\+CMTI")]);
        assert!(registry.remove("ring").is_some());
        assert!(registry.remove("ring").is_none());
        registry.clear();
        assert!(registry.is_empty());
        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn invoke_runs_handler() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let mut registry = NotificationRegistry::default();
        registry.insert(
            Notification::new("ring", r"^RING\r\n")
                .unwrap()
                .with_handler(move |bytes, _| {
                    assert_eq!(bytes, b"RING\r\n");
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
        );

        let fired = registry.first_match(b"RING\r\n").unwrap();
        registry.invoke(&fired, b"RING\r\n");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_handler_is_contained() {
        let mut registry = NotificationRegistry::default();
        registry.insert(
            Notification::new("ring", r"^RING\r\n")
                .unwrap()
                .with_handler(|_, _| panic!("bad handler")),
        );

        let fired = registry.first_match(b"RING\r\n").unwrap();
        registry.invoke(&fired, b"RING\r\n");
        assert_eq!(fired.consumed, 6);
    }

    #[test]
    fn bad_pattern_is_rejected() {
        assert!(Notification::new("bad", "[").is_err());
    }
}
