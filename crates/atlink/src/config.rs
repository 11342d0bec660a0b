//! Modem session configuration.

use std::time::Duration;

use atlink_core::error::Result;
use atlink_transport::{FlowControl, Parity, SerialConfig};

use crate::matcher::{MatchStrategy, DEFAULT_LINE_PATTERN};

/// Default deadline for a reply or for stray buffered bytes.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Default inbound buffer limit before stray bytes are discarded.
pub const DEFAULT_MAX_BUFFER: usize = 8192;

/// Default capacity of the event broadcast channels.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Settings of one modem session.
///
/// Build with [`ModemBuilder`](crate::ModemBuilder), which validates the
/// combination; the running modem exposes its copy via
/// [`Modem::config`](crate::Modem::config).
#[derive(Debug, Clone)]
pub struct ModemConfig {
    /// Serial line speed used by [`Modem::open`](crate::Modem::open).
    pub baud_rate: u32,
    /// Serial data bits (5-8).
    pub data_bits: u8,
    /// Serial stop bits (1 or 2).
    pub stop_bits: u8,
    pub parity: Parity,
    pub flow_control: FlowControl,
    /// Line pattern used by exact-text matching, compiled with Unicode mode
    /// off so lines holding non-UTF-8 bytes still frame.
    pub line_regex: String,
    /// Appended to every [`Payload::Line`](crate::Payload::Line).
    pub eol: String,
    /// Reply deadline, restarted on every inbound chunk and dispatch.
    pub timeout: Duration,
    /// Strategy for commands that do not name one.
    pub default_expected: MatchStrategy,
    /// Drop leading `\r`/`\n` from the buffer before matching.
    pub trim_terminators: bool,
    /// Inbound buffer limit in bytes.
    pub max_buffer: usize,
    /// Capacity of the event and notification broadcast channels.
    pub event_capacity: usize,
}

impl Default for ModemConfig {
    fn default() -> Self {
        ModemConfig {
            baud_rate: 115_200,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::None,
            flow_control: FlowControl::None,
            line_regex: DEFAULT_LINE_PATTERN.to_string(),
            eol: "\r\n".to_string(),
            timeout: DEFAULT_TIMEOUT,
            default_expected: MatchStrategy::default(),
            trim_terminators: true,
            max_buffer: DEFAULT_MAX_BUFFER,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl ModemConfig {
    /// The serial port settings for [`SerialTransport::open`](atlink_transport::SerialTransport::open).
    pub fn serial(&self) -> Result<SerialConfig> {
        Ok(SerialConfig {
            baud_rate: self.baud_rate,
            data_bits: self.data_bits.try_into()?,
            stop_bits: self.stop_bits.try_into()?,
            parity: self.parity,
            flow_control: self.flow_control,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlink_transport::{DataBits, StopBits};

    #[test]
    fn defaults() {
        let config = ModemConfig::default();
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.line_regex, r"^(.+)\r\n");
        assert_eq!(config.eol, "\r\n");
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert!(config.trim_terminators);
        assert_eq!(config.max_buffer, 8192);
        assert!(matches!(config.default_expected, MatchStrategy::ExactText(ref s) if s == "OK"));
    }

    #[test]
    fn serial_settings_follow_config() {
        let config = ModemConfig {
            baud_rate: 9600,
            data_bits: 7,
            stop_bits: 2,
            ..ModemConfig::default()
        };
        let serial = config.serial().unwrap();
        assert_eq!(serial.baud_rate, 9600);
        assert_eq!(serial.data_bits, DataBits::Seven);
        assert_eq!(serial.stop_bits, StopBits::Two);
    }

    #[test]
    fn invalid_serial_framing_is_rejected() {
        let config = ModemConfig {
            data_bits: 9,
            ..ModemConfig::default()
        };
        assert!(config.serial().is_err());
    }
}
