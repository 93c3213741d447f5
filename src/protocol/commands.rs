//! # CorePrint Control Commands
//!
//! This module holds the fixed byte sequences the CorePrint firmware
//! understands. They must be reproduced bit-for-bit; the firmware ignores
//! anything it does not recognise and silently drops the job.
//!
//! ## Print Sequence
//!
//! A job is always framed the same way:
//!
//! ```text
//! INITIALIZE → START_PRINT → LF×n → RASTER(header + pixels) → LF×n → END_PRINT
//! ```
//!
//! ## Byte Order
//!
//! Multi-byte integers use **little-endian** encoding:
//! - `u16` value 0x1234 is sent as bytes `[0x34, 0x12]`

// ============================================================================
// COMMAND CONSTANTS
// ============================================================================

/// # Initialize Printer (ESC @)
///
/// Resets the printer to its power-on state. Sent once at the start of
/// every job.
///
/// | Format | Bytes |
/// |--------|-------|
/// | ASCII  | ESC @ |
/// | Hex    | 1B 40 |
pub const INITIALIZE: [u8; 2] = [0x1B, 0x40];

/// # Status Request (RS G 3)
///
/// Asks the printer for its status blob. The answer has a fixed length of
/// [`STATUS_RESPONSE_LENGTH`] bytes and doubles as the connect-time
/// liveness check.
///
/// | Format | Bytes    |
/// |--------|----------|
/// | Hex    | 1E 47 03 |
pub const STATUS_REQUEST: [u8; 3] = [0x1E, 0x47, 0x03];

/// Length of the status response sent back after [`STATUS_REQUEST`].
pub const STATUS_RESPONSE_LENGTH: usize = 3;

/// # Start Print (GS I F0 19)
///
/// Wakes the print head and motor. The firmware needs a short settle time
/// after this command before it accepts raster data.
pub const START_PRINT: [u8; 4] = [0x1D, 0x49, 0xF0, 0x19];

/// # End Print
///
/// Single-byte terminator; the printer flushes and parks the head.
pub const END_PRINT: [u8; 1] = [0x9A];

/// # Raster Bitmap Header (GS v 0 m)
///
/// Followed by `xL xH yL yH` and the packed pixel data.
/// See [`super::raster::build_raster_command`].
pub const RASTER_BITMAP: [u8; 4] = [0x1D, 0x76, 0x30, 0x00];

/// LF (Line Feed) - advance the paper by one text line
pub const LINE_FEED: u8 = 0x0A;

// ============================================================================
// PAPER FEED
// ============================================================================

/// # Feed N Lines (LF × n)
///
/// ## Example
///
/// ```
/// use coreprint::protocol::commands;
///
/// assert_eq!(commands::line_feeds(3), vec![0x0A, 0x0A, 0x0A]);
/// assert!(commands::line_feeds(0).is_empty());
/// ```
#[inline]
pub fn line_feeds(count: usize) -> Vec<u8> {
    vec![LINE_FEED; count]
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Encode a u16 value as little-endian bytes [low, high]
///
/// Equivalent to `[n mod 256, n div 256]`.
///
/// ## Example
///
/// ```
/// use coreprint::protocol::commands::u16_le;
///
/// assert_eq!(u16_le(0x1234), [0x34, 0x12]);
/// assert_eq!(u16_le(48), [48, 0]); // 384 dots = 48 bytes
/// ```
#[inline]
pub const fn u16_le(value: u16) -> [u8; 2] {
    [value as u8, (value >> 8) as u8]
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_bytes() {
        assert_eq!(INITIALIZE, [0x1B, 0x40]);
        assert_eq!(STATUS_REQUEST, [0x1E, 0x47, 0x03]);
        assert_eq!(START_PRINT, [0x1D, 0x49, 0xF0, 0x19]);
        assert_eq!(END_PRINT, [0x9A]);
        assert_eq!(RASTER_BITMAP, [0x1D, 0x76, 0x30, 0x00]);
        assert_eq!(LINE_FEED, 0x0A);
    }

    #[test]
    fn test_line_feeds() {
        assert_eq!(line_feeds(1), vec![0x0A]);
        assert_eq!(line_feeds(5).len(), 5);
        assert!(line_feeds(5).iter().all(|&b| b == LINE_FEED));
        assert!(line_feeds(0).is_empty());
    }

    #[test]
    fn test_u16_le() {
        assert_eq!(u16_le(0x0000), [0x00, 0x00]);
        assert_eq!(u16_le(0x00FF), [0xFF, 0x00]);
        assert_eq!(u16_le(0x0100), [0x00, 0x01]);
        assert_eq!(u16_le(0x1234), [0x34, 0x12]);
        assert_eq!(u16_le(300), [44, 1]); // 300 = 256 + 44
    }
}
