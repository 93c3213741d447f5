//! # Printer Module
//!
//! Printer hardware specifications and connection tunables.
//!
//! ## Modules
//!
//! - [`config`]: Printer specs, reconnect policy, connection settings

pub mod config;

pub use config::{ConnectionConfig, DEFAULT_RFCOMM_CHANNEL, PrinterConfig, ReconnectPolicy, SPP_UUID};
