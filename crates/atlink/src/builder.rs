//! ModemBuilder -- fluent builder for constructing [`Modem`] instances.
//!
//! Separates configuration from construction so that callers can set up
//! framing, timeouts, and serial parameters before the dispatcher task is
//! spawned. Validation happens once, in [`ModemBuilder::build`].
//!
//! # Example
//!
//! ```no_run
//! use atlink::ModemBuilder;
//! use std::time::Duration;
//!
//! # async fn example() -> atlink_core::Result<()> {
//! let modem = ModemBuilder::new()
//!     .baud_rate(9600)
//!     .timeout(Duration::from_millis(2000))
//!     .build()?;
//! modem.open("/dev/ttyUSB0").await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use atlink_core::error::{Error, Result};
use atlink_core::transport::Transport;
use atlink_transport::{FlowControl, Parity};

use crate::config::ModemConfig;
use crate::matcher::{self, MatchStrategy};
use crate::modem::Modem;

/// Fluent builder for [`Modem`].
///
/// Every setting has a default (see [`ModemConfig::default`]), so the
/// simplest usage is `ModemBuilder::new().build()?`.
#[derive(Debug, Clone, Default)]
pub struct ModemBuilder {
    config: ModemConfig,
}

impl ModemBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration.
    pub fn from_config(config: ModemConfig) -> Self {
        ModemBuilder { config }
    }

    /// Serial line speed (default: 115200).
    pub fn baud_rate(mut self, baud: u32) -> Self {
        self.config.baud_rate = baud;
        self
    }

    /// Serial data bits (default: 8).
    pub fn data_bits(mut self, bits: u8) -> Self {
        self.config.data_bits = bits;
        self
    }

    /// Serial stop bits (default: 1).
    pub fn stop_bits(mut self, bits: u8) -> Self {
        self.config.stop_bits = bits;
        self
    }

    pub fn parity(mut self, parity: Parity) -> Self {
        self.config.parity = parity;
        self
    }

    pub fn flow_control(mut self, flow: FlowControl) -> Self {
        self.config.flow_control = flow;
        self
    }

    /// Line pattern for exact-text matching (default: `^(.+)\r\n`).
    pub fn line_regex(mut self, pattern: &str) -> Self {
        self.config.line_regex = pattern.to_string();
        self
    }

    /// Line terminator appended to text commands (default: `\r\n`).
    pub fn eol(mut self, eol: &str) -> Self {
        self.config.eol = eol.to_string();
        self
    }

    /// Reply deadline (default: 5000ms).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Strategy for commands that do not set one (default: exact text `OK`).
    pub fn default_expected(mut self, strategy: MatchStrategy) -> Self {
        self.config.default_expected = strategy;
        self
    }

    /// Trim leading line terminators from the buffer (default: on).
    pub fn trim_terminators(mut self, enabled: bool) -> Self {
        self.config.trim_terminators = enabled;
        self
    }

    /// Inbound buffer limit (default: 8192 bytes).
    pub fn max_buffer(mut self, bytes: usize) -> Self {
        self.config.max_buffer = bytes;
        self
    }

    /// Event channel capacity (default: 256).
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.config.timeout.is_zero() {
            return Err(Error::InvalidParameter("timeout must be non-zero".into()));
        }
        if self.config.max_buffer == 0 {
            return Err(Error::InvalidParameter("max_buffer must be non-zero".into()));
        }
        if self.config.event_capacity == 0 {
            return Err(Error::InvalidParameter(
                "event_capacity must be non-zero".into(),
            ));
        }
        self.config.serial()?;
        matcher::compile_line(&self.config.line_regex)?;
        Ok(())
    }

    /// Spawn the dispatcher with no transport attached.
    ///
    /// Must be called from within a Tokio runtime. Attach a device with
    /// [`Modem::open`] or [`Modem::attach`].
    pub fn build(self) -> Result<Modem> {
        self.validate()?;
        Modem::spawn(self.config)
    }

    /// Spawn the dispatcher around a caller-provided transport.
    ///
    /// This is the primary entry point for testing (pass a `MockTransport`
    /// from `atlink-test-harness`) and for transports other than serial.
    pub async fn build_with_transport(self, transport: Box<dyn Transport>) -> Result<Modem> {
        let modem = self.build()?;
        modem.attach(transport).await?;
        Ok(modem)
    }
}
