//! # CorePrint - Bluetooth Thermal Printer Core
//!
//! CorePrint drives the CorePrint CTP500 thermal label printer over a
//! Bluetooth RFCOMM serial link. It provides:
//!
//! - **Protocol encoding**: the printer's fixed control commands and the
//!   raster bitmap command
//! - **Connection management**: a state machine with channel discovery,
//!   status verification, reconnect with exponential backoff and
//!   state-change observers
//! - **Print jobs**: chunked streaming with progress reporting and
//!   cooperative cancellation
//! - **Discovery**: scanning for nearby printers through BlueZ tooling
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use coreprint::{
//!     Connection, ConnectionConfig, PrintJobConfig, PrintJobManager,
//!     render::ImageEncoder,
//! };
//!
//! let connection = Arc::new(Connection::new(ConnectionConfig::default()));
//! connection.connect("66:22:B3:00:00:01", Some("CorePrint"), true)?;
//!
//! let photo = image::open("label.png").map_err(|e| coreprint::PrinterError::Image(e.to_string()))?;
//! let bitmap = ImageEncoder::default().encode_for_printer(&photo)?;
//!
//! let jobs = PrintJobManager::new(Arc::clone(&connection));
//! jobs.set_progress_callback(|p| println!("{:>3}% {}", p.percentage, p.message));
//! jobs.print_image(bitmap, PrintJobConfig::default(), true)?;
//!
//! connection.disconnect()?;
//! # Ok::<(), coreprint::PrinterError>(())
//! ```
//!
//! ## Module Overview
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`protocol`] | Command bytes and raster encoding |
//! | [`connection`] | Connection state machine and facade |
//! | [`job`] | Print job executor |
//! | [`transport`] | RFCOMM sockets, SDP discovery, scanning |
//! | [`render`] | Image to bitmap conversion |
//! | [`settings`] | Remembered-printer persistence |
//! | [`printer`] | Printer and connection configuration |
//! | [`error`] | Error types |

pub mod connection;
pub mod error;
pub mod job;
pub mod printer;
pub mod protocol;
pub mod render;
pub mod settings;
pub mod transport;

mod sync;

// Re-exports for convenience
pub use connection::{Connection, ConnectionController, ConnectionObserver, ConnectionState};
pub use error::{PrinterError, Result};
pub use job::{JobOutcome, JobState, PrintJobConfig, PrintJobManager, PrintProgress};
pub use printer::{ConnectionConfig, PrinterConfig};
pub use transport::scan::scan_for_printers;
