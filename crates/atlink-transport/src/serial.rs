//! Serial port transport.
//!
//! [`SerialTransport`] implements [`Transport`] over `tokio-serial`. Line
//! settings come from [`SerialConfig`], whose defaults (115200 8N1, no flow
//! control) suit most cellular and Wi-Fi AT modems.

use async_trait::async_trait;
use atlink_core::error::{Error, Result};
use atlink_core::transport::Transport;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

/// Serial line settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Baud rate (e.g. 9600, 115200).
    pub baud_rate: u32,
    /// Data bits per character.
    pub data_bits: DataBits,
    /// Stop bits per character.
    pub stop_bits: StopBits,
    /// Parity checking.
    pub parity: Parity,
    /// Flow control.
    pub flow_control: FlowControl,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
            flow_control: FlowControl::None,
        }
    }
}

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

impl TryFrom<u8> for DataBits {
    type Error = Error;

    fn try_from(bits: u8) -> Result<Self> {
        match bits {
            5 => Ok(DataBits::Five),
            6 => Ok(DataBits::Six),
            7 => Ok(DataBits::Seven),
            8 => Ok(DataBits::Eight),
            other => Err(Error::InvalidParameter(format!(
                "data bits must be 5..=8, got {other}"
            ))),
        }
    }
}

impl From<DataBits> for tokio_serial::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => tokio_serial::DataBits::Five,
            DataBits::Six => tokio_serial::DataBits::Six,
            DataBits::Seven => tokio_serial::DataBits::Seven,
            DataBits::Eight => tokio_serial::DataBits::Eight,
        }
    }
}

/// Number of stop bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBits {
    One,
    Two,
}

impl TryFrom<u8> for StopBits {
    type Error = Error;

    fn try_from(bits: u8) -> Result<Self> {
        match bits {
            1 => Ok(StopBits::One),
            2 => Ok(StopBits::Two),
            other => Err(Error::InvalidParameter(format!(
                "stop bits must be 1 or 2, got {other}"
            ))),
        }
    }
}

impl From<StopBits> for tokio_serial::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => tokio_serial::StopBits::One,
            StopBits::Two => tokio_serial::StopBits::Two,
        }
    }
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Odd,
    Even,
}

impl From<Parity> for tokio_serial::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Odd => tokio_serial::Parity::Odd,
            Parity::Even => tokio_serial::Parity::Even,
        }
    }
}

/// Flow control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControl {
    None,
    Software,
    Hardware,
}

impl From<FlowControl> for tokio_serial::FlowControl {
    fn from(flow: FlowControl) -> Self {
        match flow {
            FlowControl::None => tokio_serial::FlowControl::None,
            FlowControl::Software => tokio_serial::FlowControl::Software,
            FlowControl::Hardware => tokio_serial::FlowControl::Hardware,
        }
    }
}

/// A serial port carrying an AT-style command stream.
pub struct SerialTransport {
    port: Option<SerialStream>,
    path: String,
}

impl SerialTransport {
    /// Open `path` (e.g. `/dev/ttyUSB0`, `COM3`) with the given line settings.
    pub async fn open(path: &str, config: &SerialConfig) -> Result<Self> {
        tracing::debug!(
            path = %path,
            baud_rate = config.baud_rate,
            data_bits = ?config.data_bits,
            stop_bits = ?config.stop_bits,
            parity = ?config.parity,
            flow_control = ?config.flow_control,
            "opening serial port"
        );

        let stream = tokio_serial::new(path, config.baud_rate)
            .data_bits(config.data_bits.into())
            .stop_bits(config.stop_bits.into())
            .parity(config.parity.into())
            .flow_control(config.flow_control.into())
            .open_native_async()
            .map_err(|e| {
                tracing::error!(path = %path, error = %e, "failed to open serial port");
                Error::Transport(format!("failed to open serial port {path}: {e}"))
            })?;

        tracing::info!(path = %path, baud_rate = config.baud_rate, "serial port opened");

        Ok(Self {
            port: Some(stream),
            path: path.to_string(),
        })
    }

    /// The device path this transport was opened on.
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Broken pipes and vanished devices mean the link is gone; everything else
/// is reported as a plain I/O failure.
fn map_io_error(e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::BrokenPipe | io::ErrorKind::NotConnected | io::ErrorKind::UnexpectedEof => {
            Error::ConnectionLost
        }
        _ => Error::Io(e),
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;

        tracing::trace!(path = %self.path, bytes = data.len(), data = ?data, "sending");

        port.write_all(data).await.map_err(|e| {
            tracing::error!(path = %self.path, error = %e, "serial write failed");
            map_io_error(e)
        })?;
        port.flush().await.map_err(map_io_error)?;
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;

        match tokio::time::timeout(timeout, port.read(buf)).await {
            // A zero-length read on a serial stream means the device node went away.
            Ok(Ok(0)) => Err(Error::ConnectionLost),
            Ok(Ok(n)) => {
                tracing::trace!(path = %self.path, bytes = n, data = ?&buf[..n], "received");
                Ok(n)
            }
            Ok(Err(e)) => {
                tracing::error!(path = %self.path, error = %e, "serial read failed");
                Err(map_io_error(e))
            }
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut port) = self.port.take() {
            if let Err(e) = port.flush().await {
                tracing::warn!(path = %self.path, error = %e, "flush before close failed");
            }
            tracing::info!(path = %self.path, "serial port closed");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_config_default_is_115200_8n1() {
        let config = SerialConfig::default();
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.data_bits, DataBits::Eight);
        assert_eq!(config.stop_bits, StopBits::One);
        assert_eq!(config.parity, Parity::None);
        assert_eq!(config.flow_control, FlowControl::None);
    }

    #[test]
    fn data_bits_from_number() {
        assert_eq!(DataBits::try_from(7).unwrap(), DataBits::Seven);
        assert_eq!(DataBits::try_from(8).unwrap(), DataBits::Eight);
        assert!(matches!(
            DataBits::try_from(9),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn stop_bits_from_number() {
        assert_eq!(StopBits::try_from(1).unwrap(), StopBits::One);
        assert_eq!(StopBits::try_from(2).unwrap(), StopBits::Two);
        assert!(matches!(
            StopBits::try_from(0),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn io_error_mapping() {
        let lost = map_io_error(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
        assert!(matches!(lost, Error::ConnectionLost));

        let other = map_io_error(io::Error::new(io::ErrorKind::PermissionDenied, "nope"));
        assert!(matches!(other, Error::Io(_)));
    }

    #[tokio::test]
    async fn open_missing_device_is_transport_error() {
        let result =
            SerialTransport::open("/dev/atlink-does-not-exist", &SerialConfig::default()).await;
        assert!(matches!(result, Err(Error::Transport(_))));
    }
}
