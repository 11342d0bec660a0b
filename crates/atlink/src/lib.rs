//! Command/response framing for line-oriented, half-duplex device protocols.
//!
//! `atlink` turns the chunked byte stream of an AT-style modem into
//! serialized command exchanges with one request in flight, pattern-based
//! reply extraction, deadline-driven recovery, and out-of-band detection of
//! unsolicited notifications such as `RING`.
//!
//! One tokio task owns the transport and all session state; a [`Modem`] is
//! the handle to it.
//!
//! # Architecture
//!
//! - [`matcher`]: framing strategies (exact text, regex, byte count, custom)
//! - [`command`]: command descriptions, handles, and results
//! - [`notification`]: named patterns for unsolicited messages
//! - [`config`] / [`builder`]: session settings and the fluent builder
//! - [`modem`]: the public handle
//! - `io`: the dispatcher task (queue, active slot, buffer, deadline)
//!
//! # Example
//!
//! ```no_run
//! use atlink::{Command, ModemBuilder, Notification};
//!
//! # async fn example() -> atlink_core::Result<()> {
//! let modem = ModemBuilder::new().build()?;
//! modem.open("/dev/ttyUSB0").await?;
//! modem
//!     .add_notification(Notification::new("ring", r"^RING\r\n")?)
//!     .await?;
//! modem.start_processing().await?;
//!
//! let alive = modem.add_command(Command::line("AT")).await?.value().await?;
//! println!("modem answered OK: {:?}", alive.as_bool());
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod command;
pub mod config;
pub mod matcher;
pub mod modem;
pub mod notification;

mod buffer;
mod deadline;
mod io;

pub use builder::ModemBuilder;
pub use command::{Command, CommandHandle, CommandInfo, CommandResult, Payload};
pub use config::ModemConfig;
pub use matcher::MatchStrategy;
pub use modem::Modem;
pub use notification::Notification;

pub use atlink_core::{CommandId, CommandState, Error, ModemEvent, NotificationEvent, Result, Value};
