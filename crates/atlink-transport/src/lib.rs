//! Transport implementations for atlink.
//!
//! This crate provides concrete implementations of the
//! [`Transport`](atlink_core::Transport) trait from `atlink-core`:
//!
//! - [`SerialTransport`]: USB virtual COM ports and RS-232 serial lines,
//!   the usual attachment for AT-command modems
//!
//! # Example
//!
//! ```no_run
//! use atlink_transport::{SerialConfig, SerialTransport};
//! use atlink_core::transport::Transport;
//! use std::time::Duration;
//!
//! # async fn example() -> atlink_core::Result<()> {
//! let mut transport = SerialTransport::open("/dev/ttyUSB0", &SerialConfig::default()).await?;
//!
//! transport.send(b"AT\r\n").await?;
//!
//! let mut buf = [0u8; 256];
//! let n = transport.receive(&mut buf, Duration::from_secs(1)).await?;
//! # Ok(())
//! # }
//! ```

pub mod serial;

pub use serial::{DataBits, FlowControl, Parity, SerialConfig, SerialTransport, StopBits};
