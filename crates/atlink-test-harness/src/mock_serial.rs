//! Mock transport for deterministic testing of the dispatcher.
//!
//! [`MockTransport`] implements [`Transport`] over in-memory queues. Two
//! styles of scripting are supported and can be mixed:
//!
//! - request/response pairs via [`MockTransport::expect`]: when the matching
//!   bytes are sent, the response is queued for the next `receive()`;
//! - free-running input via [`MockHandle::inject`]: bytes pushed at any time,
//!   in whatever chunking the test wants, even after the transport has been
//!   moved into a modem.
//!
//! # Example
//!
//! ```
//! use atlink_test_harness::MockTransport;
//!
//! let mut mock = MockTransport::new();
//! mock.expect(b"AT\r\n", b"\r\nOK\r\n");
//! let handle = mock.handle();
//! handle.inject(b"RING\r\n");
//! ```

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;

use atlink_core::error::{Error, Result};
use atlink_core::transport::Transport;

/// A pre-loaded request/response pair.
#[derive(Debug, Clone)]
struct Expectation {
    request: Vec<u8>,
    response: Vec<u8>,
}

#[derive(Debug)]
struct State {
    /// Ordered queue of expected request/response pairs.
    expectations: VecDeque<Expectation>,
    /// Response sent for any write when no expectation is queued.
    default_response: Option<Vec<u8>>,
    /// Chunks waiting to be read, in arrival order.
    rx: VecDeque<Vec<u8>>,
    /// How many bytes of the front chunk have already been read.
    cursor: usize,
    connected: bool,
    /// Report `ConnectionLost` on the next read.
    link_lost: bool,
    /// Fail the next send with this message.
    send_error: Option<String>,
    /// Every byte slice passed to `send()`.
    sent_log: Vec<Vec<u8>>,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    data_ready: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn queue_rx(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.lock().rx.push_back(bytes.to_vec());
        self.data_ready.notify_one();
    }
}

/// A mock [`Transport`] for testing without hardware.
#[derive(Debug)]
pub struct MockTransport {
    shared: Arc<Shared>,
}

/// A cloneable handle onto a [`MockTransport`]'s queues.
///
/// Stays usable after the transport itself has been boxed and handed to a
/// modem, which is how tests feed unsolicited bytes and inspect writes.
#[derive(Debug, Clone)]
pub struct MockHandle {
    shared: Arc<Shared>,
}

impl MockTransport {
    /// Create a new mock transport in the connected state.
    pub fn new() -> Self {
        MockTransport {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    expectations: VecDeque::new(),
                    default_response: None,
                    rx: VecDeque::new(),
                    cursor: 0,
                    connected: true,
                    link_lost: false,
                    send_error: None,
                    sent_log: Vec::new(),
                }),
                data_ready: Notify::new(),
            }),
        }
    }

    /// Get a handle that outlives moving the transport into a modem.
    pub fn handle(&self) -> MockHandle {
        MockHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Add an expected request/response pair.
    ///
    /// Expectations are consumed in order. When `send()` is called with data
    /// matching `request`, `response` becomes readable as one chunk.
    pub fn expect(&mut self, request: &[u8], response: &[u8]) {
        self.handle().expect(request, response);
    }

    /// All data sent through this transport, one element per `send()`.
    pub fn sent_data(&self) -> Vec<Vec<u8>> {
        self.handle().sent_data()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHandle {
    /// See [`MockTransport::expect`].
    pub fn expect(&self, request: &[u8], response: &[u8]) {
        self.shared.lock().expectations.push_back(Expectation {
            request: request.to_vec(),
            response: response.to_vec(),
        });
    }

    /// Answer every write that has no queued expectation with `response`.
    pub fn respond_to_all(&self, response: &[u8]) {
        self.shared.lock().default_response = Some(response.to_vec());
    }

    /// Make `bytes` readable as one chunk, as if the device sent them.
    pub fn inject(&self, bytes: &[u8]) {
        self.shared.queue_rx(bytes);
    }

    /// All data sent so far, one element per `send()`.
    pub fn sent_data(&self) -> Vec<Vec<u8>> {
        self.shared.lock().sent_log.clone()
    }

    /// Number of expectations not yet consumed.
    pub fn remaining_expectations(&self) -> usize {
        self.shared.lock().expectations.len()
    }

    /// Fail the next `send()` with a transport error carrying `message`.
    pub fn fail_next_send(&self, message: &str) {
        self.shared.lock().send_error = Some(message.to_string());
    }

    /// Simulate the device vanishing: the next read reports
    /// [`Error::ConnectionLost`] and the transport is then disconnected.
    pub fn lose_connection(&self) {
        self.shared.lock().link_lost = true;
        self.shared.data_ready.notify_one();
    }

    /// Whether the transport is still "connected".
    pub fn is_connected(&self) -> bool {
        self.shared.lock().connected
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let response = {
            let mut state = self.shared.lock();
            if !state.connected {
                return Err(Error::NotConnected);
            }
            if let Some(message) = state.send_error.take() {
                return Err(Error::Transport(message));
            }

            state.sent_log.push(data.to_vec());

            match state.expectations.pop_front() {
                Some(expectation) if data == expectation.request.as_slice() => {
                    expectation.response
                }
                Some(expectation) => {
                    return Err(Error::Transport(format!(
                        "unexpected send data: expected {:02X?}, got {:02X?}",
                        expectation.request, data
                    )));
                }
                None => state.default_response.clone().unwrap_or_default(),
            }
        };

        self.shared.queue_rx(&response);
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            {
                let mut state = self.shared.lock();
                if state.link_lost {
                    state.link_lost = false;
                    state.connected = false;
                    return Err(Error::ConnectionLost);
                }
                if !state.connected {
                    return Err(Error::NotConnected);
                }

                let cursor = state.cursor;
                if let Some(chunk) = state.rx.front() {
                    let remaining = &chunk[cursor..];
                    let n = remaining.len().min(buf.len());
                    buf[..n].copy_from_slice(&remaining[..n]);
                    if cursor + n >= chunk.len() {
                        state.rx.pop_front();
                        state.cursor = 0;
                    } else {
                        state.cursor += n;
                    }
                    return Ok(n);
                }
            }

            // `notify_one` stores a permit, so an inject that races this
            // check still wakes the wait below.
            if tokio::time::timeout_at(deadline, self.shared.data_ready.notified())
                .await
                .is_err()
            {
                return Err(Error::Timeout);
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        let mut state = self.shared.lock();
        state.connected = false;
        state.rx.clear();
        state.cursor = 0;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.shared.lock().connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Duration = Duration::from_millis(100);

    #[tokio::test]
    async fn expectation_queues_response() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT\r\n", b"\r\nOK\r\n");

        mock.send(b"AT\r\n").await.unwrap();

        let mut buf = [0u8; 64];
        let n = mock.receive(&mut buf, WAIT).await.unwrap();
        assert_eq!(&buf[..n], b"\r\nOK\r\n");
    }

    #[tokio::test]
    async fn wrong_data_errors() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT\r\n", b"OK\r\n");

        let result = mock.send(b"ATZ\r\n").await;
        assert!(matches!(result, Err(Error::Transport(_))));
    }

    #[tokio::test]
    async fn send_without_expectation_is_recorded() {
        let mut mock = MockTransport::new();
        mock.send(b"ATE0\r\n").await.unwrap();
        mock.send(&[0x1A]).await.unwrap();

        assert_eq!(mock.sent_data(), vec![b"ATE0\r\n".to_vec(), vec![0x1A]]);
    }

    #[tokio::test]
    async fn respond_to_all_answers_unscripted_writes() {
        let mut mock = MockTransport::new();
        mock.handle().respond_to_all(b"OK\r\n");

        mock.send(b"AT+CSQ\r\n").await.unwrap();
        let mut buf = [0u8; 16];
        let n = mock.receive(&mut buf, WAIT).await.unwrap();
        assert_eq!(&buf[..n], b"OK\r\n");
    }

    #[tokio::test]
    async fn injected_chunks_keep_their_boundaries() {
        let mut mock = MockTransport::new();
        let handle = mock.handle();
        handle.inject(b"RI");
        handle.inject(b"NG\r\n");

        let mut buf = [0u8; 64];
        let n = mock.receive(&mut buf, WAIT).await.unwrap();
        assert_eq!(&buf[..n], b"RI");
        let n = mock.receive(&mut buf, WAIT).await.unwrap();
        assert_eq!(&buf[..n], b"NG\r\n");
    }

    #[tokio::test]
    async fn partial_receive_resumes_chunk() {
        let mut mock = MockTransport::new();
        mock.handle().inject(&[0xAA, 0xBB, 0xCC, 0xDD]);

        let mut buf = [0u8; 3];
        let n = mock.receive(&mut buf, WAIT).await.unwrap();
        assert_eq!(&buf[..n], &[0xAA, 0xBB, 0xCC]);
        let n = mock.receive(&mut buf, WAIT).await.unwrap();
        assert_eq!(&buf[..n], &[0xDD]);
    }

    #[tokio::test]
    async fn receive_without_data_times_out() {
        let mut mock = MockTransport::new();
        let mut buf = [0u8; 8];
        let result = mock.receive(&mut buf, Duration::from_millis(10)).await;
        assert!(matches!(result, Err(Error::Timeout)));
    }

    #[tokio::test]
    async fn inject_wakes_pending_receive() {
        let mut mock = MockTransport::new();
        let handle = mock.handle();

        let feeder = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.inject(b"OK\r\n");
        });

        let mut buf = [0u8; 8];
        let n = mock
            .receive(&mut buf, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(&buf[..n], b"OK\r\n");
        feeder.await.unwrap();
    }

    #[tokio::test]
    async fn fail_next_send_is_one_shot() {
        let mut mock = MockTransport::new();
        mock.handle().fail_next_send("cable unplugged");

        assert!(matches!(
            mock.send(b"AT\r\n").await,
            Err(Error::Transport(_))
        ));
        assert!(mock.send(b"AT\r\n").await.is_ok());
    }

    #[tokio::test]
    async fn lose_connection_then_not_connected() {
        let mut mock = MockTransport::new();
        let handle = mock.handle();
        handle.lose_connection();

        let mut buf = [0u8; 8];
        assert!(matches!(
            mock.receive(&mut buf, WAIT).await,
            Err(Error::ConnectionLost)
        ));
        assert!(!handle.is_connected());
        assert!(matches!(
            mock.receive(&mut buf, WAIT).await,
            Err(Error::NotConnected)
        ));
    }

    #[tokio::test]
    async fn close_disconnects() {
        let mut mock = MockTransport::new();
        assert!(mock.is_connected());

        mock.close().await.unwrap();
        assert!(!mock.is_connected());
        assert!(matches!(
            mock.send(b"AT\r\n").await,
            Err(Error::NotConnected)
        ));
    }
}
