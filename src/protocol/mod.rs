//! # CorePrint Protocol Implementation
//!
//! Stateless builders for the byte sequences the CorePrint firmware
//! expects. Nothing in here touches a socket.
//!
//! ## Module Structure
//!
//! - [`commands`]: Control commands (init, status, start/end, line feed)
//! - [`raster`]: Raster bitmap command
//!
//! ## Usage Example
//!
//! ```
//! use coreprint::protocol::{commands, raster};
//!
//! let bitmap = raster::PrinterBitmap::new(384, 2, vec![0xFF; 96])?;
//!
//! let mut data = Vec::new();
//! data.extend(commands::INITIALIZE);
//! data.extend(commands::START_PRINT);
//! data.extend(raster::build_raster_command(&bitmap));
//! data.extend(commands::line_feeds(2));
//! data.extend(commands::END_PRINT);
//!
//! assert_eq!(data.len(), 2 + 4 + 8 + 96 + 2 + 1);
//! # Ok::<(), coreprint::PrinterError>(())
//! ```

pub mod commands;
pub mod raster;
