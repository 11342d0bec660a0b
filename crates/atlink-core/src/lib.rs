//! atlink-core: Core traits, types, and error definitions for atlink.
//!
//! This crate defines the transport-agnostic abstractions shared by the
//! dispatcher, the transports, and the test harness. Applications that only
//! consume modem events can depend on these types without pulling in the
//! serial stack.
//!
//! # Key types
//!
//! - [`Transport`] -- byte-level duplex channel to a device
//! - [`ModemEvent`] -- session events published by a running modem
//! - [`CommandId`] / [`CommandState`] / [`Value`] -- command lifecycle data
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod events;
pub mod transport;
pub mod types;

// Re-export key types at crate root for ergonomic `use atlink_core::*`.
pub use error::{Error, Result};
pub use events::{ModemEvent, NotificationEvent};
pub use transport::Transport;
pub use types::*;
