//! Transport trait for device communication.
//!
//! The [`Transport`] trait abstracts over the byte channel to a device. The
//! dispatcher in the `atlink` crate owns exactly one transport and never
//! interprets its errors beyond mapping them onto session events; framing is
//! entirely the dispatcher's concern.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Asynchronous duplex byte channel to a device.
///
/// Reads deliver whatever bytes are available; no framing is implied, so a
/// single response may arrive split across several reads and several
/// responses may arrive in one.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write all of `data` to the device.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive available bytes into `buf`.
    ///
    /// Returns the number of bytes read. Waits up to `timeout` for data;
    /// returns [`Error::Timeout`](crate::error::Error::Timeout) if nothing
    /// arrived. Must be cancel-safe: dropping the future loses no bytes.
    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Close the connection. Later `send`/`receive` calls fail with
    /// [`Error::NotConnected`](crate::error::Error::NotConnected).
    async fn close(&mut self) -> Result<()>;

    /// Whether the transport is currently open.
    fn is_connected(&self) -> bool;
}
