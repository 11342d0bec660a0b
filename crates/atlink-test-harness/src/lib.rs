//! atlink-test-harness: Test utilities for atlink.
//!
//! This crate provides [`MockTransport`] for deterministic testing of the
//! dispatcher without a real modem, and [`MockHandle`] for feeding it bytes
//! after the transport has been moved into a modem.

pub mod mock_serial;

pub use mock_serial::{MockHandle, MockTransport};
