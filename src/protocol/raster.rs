//! # Raster Bitmap Encoding
//!
//! Builds the `GS v 0` raster command from a finished 1-bit bitmap.
//!
//! ## Bit Packing
//!
//! - Bit 7 (MSB) = leftmost dot
//! - 1 = ink, 0 = paper
//!
//! The pixel buffer is passed through untouched. Inverting, padding and
//! dithering belong to the image side (see [`crate::render::dither`]).
//!
//! ## Command Layout
//!
//! ```text
//! 1D 76 30 00 | xL xH | yL yH | d1 ... dk
//!   header      width    height   k = (W/8) × H
//!               (bytes)  (rows)
//! ```

use super::commands::{RASTER_BITMAP, u16_le};
use crate::error::{PrinterError, Result};

/// Header size: 4 command bytes + 2 width bytes + 2 height bytes
pub const RASTER_HEADER_LEN: usize = RASTER_BITMAP.len() + 4;

/// A packed 1-bit image ready for the printer.
///
/// Construction validates the invariants the encoder relies on, so
/// [`build_raster_command`] itself cannot fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrinterBitmap {
    width: u16,
    height: u16,
    data: Vec<u8>,
}

impl PrinterBitmap {
    /// Wrap a packed pixel buffer.
    ///
    /// ## Errors
    ///
    /// Returns [`PrinterError::InvalidBitmap`] if:
    /// - `width` is not a multiple of 8
    /// - `width` or `height` exceeds 65535
    /// - `data.len() != width / 8 * height`
    pub fn new(width: usize, height: usize, data: Vec<u8>) -> Result<Self> {
        if width % 8 != 0 {
            return Err(PrinterError::InvalidBitmap(format!(
                "width {} is not a multiple of 8",
                width
            )));
        }
        let (Ok(w), Ok(h)) = (u16::try_from(width), u16::try_from(height)) else {
            return Err(PrinterError::InvalidBitmap(format!(
                "dimensions {}x{} exceed 65535",
                width, height
            )));
        };

        let expected = width / 8 * height;
        if data.len() != expected {
            return Err(PrinterError::InvalidBitmap(format!(
                "expected {} bytes ({} bytes x {} rows), got {}",
                expected,
                width / 8,
                height,
                data.len()
            )));
        }

        Ok(Self {
            width: w,
            height: h,
            data,
        })
    }

    /// Width in dots
    pub fn width(&self) -> u16 {
        self.width
    }

    /// Width in bytes (width / 8)
    pub fn width_bytes(&self) -> u16 {
        self.width / 8
    }

    /// Height in rows
    pub fn height(&self) -> u16 {
        self.height
    }

    /// Packed pixel data
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// # Build Raster Command
///
/// `RASTER_BITMAP ++ u16_le(W/8) ++ u16_le(H) ++ pixels`
///
/// ## Example
///
/// ```
/// use coreprint::protocol::raster::{PrinterBitmap, build_raster_command};
///
/// let bitmap = PrinterBitmap::new(384, 10, vec![0u8; 48 * 10])?;
/// let cmd = build_raster_command(&bitmap);
///
/// assert_eq!(&cmd[..8], &[0x1D, 0x76, 0x30, 0x00, 48, 0, 10, 0]);
/// assert_eq!(cmd.len(), 8 + 48 * 10);
/// # Ok::<(), coreprint::PrinterError>(())
/// ```
pub fn build_raster_command(bitmap: &PrinterBitmap) -> Vec<u8> {
    let [xl, xh] = u16_le(bitmap.width_bytes());
    let [yl, yh] = u16_le(bitmap.height());

    let mut cmd = Vec::with_capacity(raster_len(bitmap));
    cmd.extend_from_slice(&RASTER_BITMAP);
    cmd.push(xl);
    cmd.push(xh);
    cmd.push(yl);
    cmd.push(yh);
    cmd.extend_from_slice(bitmap.data());
    cmd
}

/// Total length of the raster command for `bitmap`.
#[inline]
pub fn raster_len(bitmap: &PrinterBitmap) -> usize {
    RASTER_HEADER_LEN + bitmap.data().len()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_raster_header_full_width() {
        let bitmap = PrinterBitmap::new(384, 10, vec![0xAA; 480]).unwrap();
        let cmd = build_raster_command(&bitmap);

        assert_eq!(&cmd[..4], &RASTER_BITMAP);
        assert_eq!(&cmd[4..6], &[48, 0]);
        assert_eq!(&cmd[6..8], &[10, 0]);
        assert_eq!(cmd.len(), 8 + 480);
        assert!(cmd[8..].iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn test_raster_height_high_byte() {
        let bitmap = PrinterBitmap::new(8, 300, vec![0xFF; 300]).unwrap();
        let cmd = build_raster_command(&bitmap);

        assert_eq!(&cmd[4..8], &[1, 0, 44, 1]);
    }

    #[test]
    fn test_raster_length_property() {
        for width in (8..=384).step_by(40) {
            for height in [0usize, 1, 7, 255, 256] {
                let bitmap =
                    PrinterBitmap::new(width, height, vec![0; width / 8 * height]).unwrap();
                assert_eq!(build_raster_command(&bitmap).len(), 8 + width / 8 * height);
                assert_eq!(raster_len(&bitmap), 8 + width / 8 * height);
            }
        }
    }

    #[test]
    fn test_pixels_pass_through_unmodified() {
        let data: Vec<u8> = (0..=255).collect();
        let bitmap = PrinterBitmap::new(16, 128, data.clone()).unwrap();
        let cmd = build_raster_command(&bitmap);
        assert_eq!(&cmd[8..], data.as_slice());
    }

    #[test]
    fn test_empty_bitmap() {
        let bitmap = PrinterBitmap::new(384, 0, Vec::new()).unwrap();
        let cmd = build_raster_command(&bitmap);
        assert_eq!(cmd, vec![0x1D, 0x76, 0x30, 0x00, 48, 0, 0, 0]);
    }

    #[test]
    fn test_rejects_unaligned_width() {
        let err = PrinterBitmap::new(383, 1, vec![0; 47]).unwrap_err();
        assert!(matches!(err, PrinterError::InvalidBitmap(_)));
    }

    #[test]
    fn test_rejects_length_mismatch() {
        let err = PrinterBitmap::new(384, 2, vec![0; 48]).unwrap_err();
        assert!(matches!(err, PrinterError::InvalidBitmap(_)));
    }

    #[test]
    fn test_rejects_oversized_height() {
        let err = PrinterBitmap::new(8, 70_000, vec![0; 70_000]).unwrap_err();
        assert!(matches!(err, PrinterError::InvalidBitmap(_)));
    }
}
