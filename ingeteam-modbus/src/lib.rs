//! Modbus/TCP polling hub for Ingeteam hybrid inverters.
//!
//! A [`ModbusHub`] owns one connection to one inverter. While at least one
//! observer is subscribed it reads the input register map on a fixed
//! interval, decodes it into a [`Snapshot`] of named measurements and
//! notifies every observer.
//!
//! # Register layouts
//!
//! ```text
//! single_block   one read: address 0, 81 registers
//! multi_block    status 0..17, battery 17..31, pv 31..37,
//!                inverter 37..68, meter 68..81
//! ```
//!
//! Both layouts decode to the same keys.

pub mod config;
pub mod decoder;
pub mod error;
pub mod hub;
pub mod logging;
pub mod registers;
pub mod snapshot;
pub mod transport;

pub use config::{ConfigError, HubConfig, LogFormat, LoggingConfig, MonitorConfig};
pub use decoder::{RegisterDecoder, RegisterLayout, RegisterWindow};
pub use error::{DecodeError, PollError, TransportError};
pub use hub::{ModbusHub, Observer, ObserverId, TickOutcome};
pub use logging::init_tracing;
pub use snapshot::{Snapshot, Value};
pub use transport::{RegisterTransport, TcpTransport, TransportConnection};
